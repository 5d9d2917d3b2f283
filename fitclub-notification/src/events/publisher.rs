use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use fitclub_shared::types::{routing_keys, ChangeEvent, Event};

use crate::AppState;

const SOURCE: &str = "fitclub-notification";

/// Only changes produced by this instance are forwarded. Changes received
/// from peers are already on the exchange.
pub fn should_forward(change: &ChangeEvent, local_origin: uuid::Uuid) -> bool {
    change.origin == local_origin
}

/// Forward local change-feed events to the broker so peer instances can
/// notify their own SSE subscribers.
pub async fn forward_changes(state: Arc<AppState>) -> anyhow::Result<()> {
    let Some(rabbitmq) = state.rabbitmq.clone() else {
        return Ok(());
    };
    let origin = state.feed.origin();
    let mut rx = state.feed.subscribe();

    tracing::info!(origin = %origin, "forwarding change feed to broker");

    loop {
        match rx.recv().await {
            Ok(change) => {
                if !should_forward(&change, origin) {
                    continue;
                }
                let routing_key = routing_keys::notification_document(change.kind);
                let event = Event::new(SOURCE, routing_key, change);
                if let Err(e) = rabbitmq.publish(routing_key, &event).await {
                    tracing::error!(error = %e, routing_key, "failed to publish change event");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "broker forwarder lagged, peers may miss changes");
            }
            Err(RecvError::Closed) => break,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitclub_shared::types::ChangeKind;
    use uuid::Uuid;

    #[test]
    fn only_local_changes_are_forwarded() {
        let local = Uuid::new_v4();
        let mine = ChangeEvent::notification(local, ChangeKind::Created, Uuid::new_v4(), Uuid::new_v4());
        let peer = ChangeEvent::notification(Uuid::new_v4(), ChangeKind::Updated, Uuid::new_v4(), Uuid::new_v4());

        assert!(should_forward(&mine, local));
        assert!(!should_forward(&peer, local));
    }
}
