use std::sync::Arc;

use futures_lite::StreamExt;
use lapin::options::BasicAckOptions;
use lapin::Consumer;

use fitclub_shared::types::{payloads, routing_keys, ChangeEvent, Event};

use crate::AppState;

/// Ack every delivery after handing its payload to `handle`. Handler errors
/// are logged by the handler itself; a poison message is never redelivered.
async fn drain<F, Fut>(mut consumer: Consumer, name: &'static str, handle: F)
where
    F: Fn(Vec<u8>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    while let Some(delivery) = consumer.next().await {
        match delivery {
            Ok(delivery) => {
                handle(delivery.data.clone()).await;
                let _ = delivery.ack(BasicAckOptions::default()).await;
            }
            Err(e) => {
                tracing::error!(error = %e, consumer = name, "consumer error");
            }
        }
    }
}

/// Listen for tenant.created and register the tenant locally.
pub async fn listen_tenant_events(state: Arc<AppState>) -> anyhow::Result<()> {
    let Some(rabbitmq) = state.rabbitmq.as_ref() else {
        return Ok(());
    };
    let consumer = rabbitmq
        .subscribe("fitclub-notification.tenant.created", &[routing_keys::TENANT_CREATED])
        .await?;

    tracing::info!("listening for tenant events");
    drain(consumer, "tenant", |data| handle_tenant_created(&state, data)).await;
    Ok(())
}

pub async fn handle_tenant_created(state: &AppState, data: Vec<u8>) {
    match serde_json::from_slice::<Event<payloads::TenantCreated>>(&data) {
        Ok(event) => {
            let payload = &event.data;
            tracing::info!(tenant_id = %payload.tenant_id, "received tenant.created event");
            if let Err(e) = state.notifications.register_tenant(payload.tenant_id, &payload.name).await {
                tracing::error!(error = %e, tenant_id = %payload.tenant_id, "failed to register tenant");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to deserialize tenant.created event"),
    }
}

/// Listen for account deletion and revoke every push token of the account.
pub async fn listen_account_events(state: Arc<AppState>) -> anyhow::Result<()> {
    let Some(rabbitmq) = state.rabbitmq.as_ref() else {
        return Ok(());
    };
    let consumer = rabbitmq
        .subscribe(
            "fitclub-notification.account.deleted",
            &[routing_keys::AUTH_ACCOUNT_DELETED],
        )
        .await?;

    tracing::info!("listening for account events");
    drain(consumer, "account", |data| handle_account_deleted(&state, data)).await;
    Ok(())
}

pub async fn handle_account_deleted(state: &AppState, data: Vec<u8>) {
    match serde_json::from_slice::<Event<payloads::AccountDeleted>>(&data) {
        Ok(event) => {
            let user_id = event.data.user_id;
            tracing::info!(user_id = %user_id, "received account.deleted event");
            if let Err(e) = state.push_tokens.remove_all_tokens(user_id).await {
                tracing::error!(error = %e, user_id = %user_id, "failed to revoke push tokens");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to deserialize account.deleted event"),
    }
}

/// Listen for broadcast requests from other services (class schedule
/// changes, billing reminders) and create the tenant notification.
pub async fn listen_broadcast_requests(state: Arc<AppState>) -> anyhow::Result<()> {
    let Some(rabbitmq) = state.rabbitmq.as_ref() else {
        return Ok(());
    };
    let consumer = rabbitmq
        .subscribe(
            "fitclub-notification.broadcast.requested",
            &[routing_keys::NOTIFICATION_BROADCAST_REQUESTED],
        )
        .await?;

    tracing::info!("listening for broadcast requests");
    drain(consumer, "broadcast", |data| handle_broadcast_requested(&state, data)).await;
    Ok(())
}

pub async fn handle_broadcast_requested(state: &AppState, data: Vec<u8>) {
    match serde_json::from_slice::<Event<payloads::BroadcastRequested>>(&data) {
        Ok(event) => {
            let payload = event.data;
            tracing::info!(tenant_id = %payload.tenant_id, source = %event.source, "received broadcast request");
            if let Err(e) = state
                .notifications
                .create(
                    payload.tenant_id,
                    payload.notification_type,
                    &payload.title,
                    &payload.message,
                    payload.action,
                )
                .await
            {
                tracing::error!(error = %e, tenant_id = %payload.tenant_id, "failed to create broadcast");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to deserialize broadcast request"),
    }
}

/// Listen for change events published by peer instances. Each instance owns
/// an exclusive queue so every peer sees every change.
pub async fn listen_peer_changes(state: Arc<AppState>) -> anyhow::Result<()> {
    let Some(rabbitmq) = state.rabbitmq.as_ref() else {
        return Ok(());
    };
    let queue = format!("fitclub-notification.changes.{}", state.feed.origin());
    let consumer = rabbitmq
        .subscribe_fanout(&queue, &[routing_keys::NOTIFICATION_DOCUMENT_ALL])
        .await?;

    tracing::info!(queue = %queue, "listening for peer changes");
    let local: &AppState = &state;
    drain(consumer, "changes", |data| async move {
        apply_peer_change(local, data);
    })
    .await;
    Ok(())
}

/// Re-emit a peer's change locally. Returns whether it was re-emitted; own
/// events coming back from the exchange are dropped.
pub fn apply_peer_change(state: &AppState, data: Vec<u8>) -> bool {
    match serde_json::from_slice::<Event<ChangeEvent>>(&data) {
        Ok(event) => {
            let change = event.data;
            if change.origin == state.feed.origin() {
                return false;
            }
            tracing::debug!(
                origin = %change.origin,
                tenant_id = %change.tenant_id,
                kind = %change.kind,
                "peer change received"
            );
            state.feed.emit(change);
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to deserialize peer change event");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedItem;
    use crate::test_support::test_state;
    use fitclub_shared::types::{ChangeKind, NotificationAction, NotificationType, Platform};
    use uuid::Uuid;

    fn encode<T: serde::Serialize>(key: &str, data: T) -> Vec<u8> {
        serde_json::to_vec(&Event::new("test", key, data)).unwrap()
    }

    #[tokio::test]
    async fn tenant_created_registers_tenant() {
        let state = test_state();
        let gym = Uuid::new_v4();
        let data = encode(
            routing_keys::TENANT_CREATED,
            payloads::TenantCreated { tenant_id: gym, name: "Eastside".into() },
        );

        handle_tenant_created(&state, data).await;
        assert!(state.notifications.list(gym, Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn account_deleted_revokes_tokens() {
        let state = test_state();
        let user = Uuid::new_v4();
        state.push_tokens.register_token(user, "T1", Platform::Ios).await.unwrap();

        let data = encode(routing_keys::AUTH_ACCOUNT_DELETED, payloads::AccountDeleted { user_id: user });
        handle_account_deleted(&state, data).await;

        assert!(state.push_tokens.list_tokens(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn broadcast_request_creates_notification() {
        let state = test_state();
        let gym = Uuid::new_v4();
        state.notifications.register_tenant(gym, "Northside").await.unwrap();

        let data = encode(
            routing_keys::NOTIFICATION_BROADCAST_REQUESTED,
            payloads::BroadcastRequested {
                tenant_id: gym,
                notification_type: NotificationType::Warning,
                title: "HIIT cancelled".into(),
                message: "Coach is ill".into(),
                action: NotificationAction::None,
            },
        );
        handle_broadcast_requested(&state, data).await;

        let listed = state.notifications.list(gym, Uuid::new_v4()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].notification_type, NotificationType::Warning);
    }

    #[tokio::test]
    async fn peer_changes_are_reemitted_but_own_are_not() {
        let state = test_state();
        let gym = Uuid::new_v4();
        let mut sub = state.feed.subscribe_tenant(gym);

        let own = ChangeEvent::notification(state.feed.origin(), ChangeKind::Updated, gym, Uuid::new_v4());
        assert!(!apply_peer_change(&state, encode(routing_keys::NOTIFICATION_DOCUMENT_UPDATED, own)));

        let peer = ChangeEvent::notification(Uuid::new_v4(), ChangeKind::Created, gym, Uuid::new_v4());
        let peer_id = peer.id;
        assert!(apply_peer_change(&state, encode(routing_keys::NOTIFICATION_DOCUMENT_CREATED, peer)));

        match sub.next().await {
            Some(FeedItem::Change(evt)) => assert_eq!(evt.id, peer_id),
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn garbage_payload_is_ignored() {
        let state = test_state();
        assert!(!apply_peer_change(&state, b"not json".to_vec()));
    }
}
