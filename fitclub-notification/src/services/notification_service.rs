use std::sync::Arc;

use metrics::counter;
use uuid::Uuid;

use fitclub_shared::errors::{AppError, AppResult, ErrorCode};
use fitclub_shared::types::{
    display_order, BatchOutcome, ChangeKind, NotificationAction, NotificationRecord, NotificationType,
};

use crate::feed::ChangeFeed;
use crate::models::NotificationDraft;
use crate::store::{NotificationStore, SetAddition};

const MAX_TITLE_LEN: usize = 255;
const MAX_MESSAGE_LEN: usize = 2000;

/// Tenant- and user-scoped façade over the notification store.
///
/// Read and delete are per-recipient set-additions: they are idempotent,
/// commute across devices, and never remove the record for anyone else.
#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    feed: ChangeFeed,
}

/// Count unread records in an already visibility-filtered list.
pub fn unread_in(visible: &[NotificationRecord], user_id: Uuid) -> usize {
    visible.iter().filter(|n| !n.is_read_by(user_id)).count()
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>, feed: ChangeFeed) -> Self {
        Self { store, feed }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.store.ping().await
    }

    /// Register a tenant. Returns `true` if it was not known before.
    pub async fn register_tenant(&self, tenant_id: Uuid, name: &str) -> AppResult<bool> {
        let created = self.store.upsert_tenant(tenant_id, name).await?;
        if created {
            tracing::info!(tenant_id = %tenant_id, name = %name, "tenant registered");
        }
        Ok(created)
    }

    async fn ensure_tenant(&self, tenant_id: Uuid) -> AppResult<()> {
        if self.store.tenant_exists(tenant_id).await? {
            Ok(())
        } else {
            Err(AppError::new(ErrorCode::TenantNotFound, "tenant not found"))
        }
    }

    pub async fn tenant_of(&self, notification_id: Uuid) -> AppResult<Option<Uuid>> {
        self.store.notification_tenant(notification_id).await
    }

    /// Create a tenant-wide broadcast with empty read/delete sets.
    pub async fn create(
        &self,
        tenant_id: Uuid,
        notification_type: NotificationType,
        title: &str,
        message: &str,
        action: NotificationAction,
    ) -> AppResult<NotificationRecord> {
        let title = title.trim();
        let message = message.trim();
        if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
            return Err(AppError::new(ErrorCode::ValidationError, "title must be 1-255 characters"));
        }
        if message.is_empty() || message.chars().count() > MAX_MESSAGE_LEN {
            return Err(AppError::new(ErrorCode::ValidationError, "message must be 1-2000 characters"));
        }

        self.ensure_tenant(tenant_id).await?;

        let draft = NotificationDraft {
            tenant_id,
            notification_type,
            title: title.to_string(),
            message: message.to_string(),
            action,
        };
        let record = self.store.insert_notification(&draft).await?;

        counter!("notifications_created_total").increment(1);
        self.feed.record(ChangeKind::Created, tenant_id, record.id);

        tracing::info!(
            notification_id = %record.id,
            tenant_id = %tenant_id,
            notification_type = %notification_type,
            "notification created"
        );

        Ok(record)
    }

    /// Visible records for `user_id`, newest first. Fails only for an
    /// unknown tenant.
    pub async fn list(&self, tenant_id: Uuid, user_id: Uuid) -> AppResult<Vec<NotificationRecord>> {
        self.ensure_tenant(tenant_id).await?;

        let mut visible: Vec<NotificationRecord> = self
            .store
            .tenant_notifications(tenant_id)
            .await?
            .into_iter()
            .filter(|n| n.is_visible_to(tenant_id, user_id))
            .collect();
        visible.sort_by(display_order);

        Ok(visible)
    }

    /// Derived from the same filtered view as `list`, so dismissed records
    /// are never counted as unread.
    pub async fn unread_count(&self, tenant_id: Uuid, user_id: Uuid) -> AppResult<usize> {
        let visible = self.list(tenant_id, user_id).await?;
        Ok(unread_in(&visible, user_id))
    }

    pub async fn mark_read(&self, notification_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let outcome = self.store.add_reader(notification_id, user_id).await?;
        self.after_set_addition("read", notification_id, user_id, outcome);
        Ok(())
    }

    /// Per-user dismissal. The record stays visible to every other recipient.
    pub async fn delete(&self, notification_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let outcome = self.store.add_deleter(notification_id, user_id).await?;
        self.after_set_addition("delete", notification_id, user_id, outcome);
        Ok(())
    }

    fn after_set_addition(&self, op: &'static str, notification_id: Uuid, user_id: Uuid, outcome: SetAddition) {
        match outcome {
            SetAddition::Added { tenant_id } => {
                counter!("notification_mutations_total", "op" => op).increment(1);
                self.feed.record(ChangeKind::Updated, tenant_id, notification_id);
                tracing::debug!(notification_id = %notification_id, user_id = %user_id, op, "recipient state updated");
            }
            SetAddition::AlreadyPresent => {
                tracing::debug!(notification_id = %notification_id, user_id = %user_id, op, "already applied");
            }
            SetAddition::MissingDocument => {
                tracing::warn!(notification_id = %notification_id, user_id = %user_id, op, "notification not found, treating as applied");
            }
        }
    }

    /// Mark every visible unread record as read. Per-item failures are
    /// logged and counted; nothing is rolled back.
    pub async fn mark_all_read(&self, tenant_id: Uuid, user_id: Uuid) -> AppResult<BatchOutcome> {
        let targets: Vec<Uuid> = self
            .list(tenant_id, user_id)
            .await?
            .into_iter()
            .filter(|n| !n.is_read_by(user_id))
            .map(|n| n.id)
            .collect();

        let mut outcome = BatchOutcome::default();
        for id in targets {
            outcome.attempted += 1;
            match self.mark_read(id, user_id).await {
                Ok(()) => outcome.applied += 1,
                Err(e) => {
                    outcome.failed += 1;
                    tracing::warn!(notification_id = %id, user_id = %user_id, error = %e, "mark_read failed during mark_all_read");
                }
            }
        }

        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            attempted = outcome.attempted,
            failed = outcome.failed,
            "mark_all_read finished"
        );
        Ok(outcome)
    }

    /// Dismiss every visible record for the user, same partial-failure rules
    /// as `mark_all_read`.
    pub async fn delete_all(&self, tenant_id: Uuid, user_id: Uuid) -> AppResult<BatchOutcome> {
        let targets: Vec<Uuid> = self.list(tenant_id, user_id).await?.into_iter().map(|n| n.id).collect();

        let mut outcome = BatchOutcome::default();
        for id in targets {
            outcome.attempted += 1;
            match self.delete(id, user_id).await {
                Ok(()) => outcome.applied += 1,
                Err(e) => {
                    outcome.failed += 1;
                    tracing::warn!(notification_id = %id, user_id = %user_id, error = %e, "delete failed during delete_all");
                }
            }
        }

        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            attempted = outcome.attempted,
            failed = outcome.failed,
            "delete_all finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    use crate::feed::FeedItem;
    use crate::store::MemoryStore;

    async fn setup() -> (NotificationService, Uuid) {
        let service = NotificationService::new(Arc::new(MemoryStore::new()), ChangeFeed::new(64));
        let tenant = Uuid::new_v4();
        service.register_tenant(tenant, "Downtown Gym").await.unwrap();
        (service, tenant)
    }

    async fn announce(service: &NotificationService, tenant: Uuid, title: &str) -> NotificationRecord {
        service
            .create(tenant, NotificationType::Info, title, "Details inside", NotificationAction::None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_starts_with_empty_sets() {
        let (service, tenant) = setup().await;
        let n = announce(&service, tenant, "Yoga moved").await;
        assert!(n.read_by.is_empty());
        assert!(n.deleted_by.is_empty());
        assert_eq!(n.tenant_id, tenant);
    }

    #[tokio::test]
    async fn mark_read_twice_keeps_one_entry() {
        let (service, tenant) = setup().await;
        let user = Uuid::new_v4();
        let n = announce(&service, tenant, "Sauna open").await;

        service.mark_read(n.id, user).await.unwrap();
        service.mark_read(n.id, user).await.unwrap();

        let listed = service.list(tenant, user).await.unwrap();
        assert_eq!(listed[0].read_by.iter().filter(|u| **u == user).count(), 1);
        assert_eq!(listed[0].read_by.len(), 1);
    }

    #[tokio::test]
    async fn delete_twice_keeps_one_entry() {
        let (service, tenant) = setup().await;
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let n = announce(&service, tenant, "Holiday hours").await;

        service.delete(n.id, user).await.unwrap();
        service.delete(n.id, user).await.unwrap();

        let seen_by_other = service.list(tenant, other).await.unwrap();
        assert_eq!(seen_by_other[0].deleted_by.len(), 1);
        assert!(seen_by_other[0].is_deleted_by(user));
    }

    #[tokio::test]
    async fn unread_count_matches_filtered_list() {
        let (service, tenant) = setup().await;
        let user = Uuid::new_v4();
        let a = announce(&service, tenant, "A").await;
        let b = announce(&service, tenant, "B").await;
        let c = announce(&service, tenant, "C").await;
        announce(&service, tenant, "D").await;

        service.mark_read(a.id, user).await.unwrap();
        // deleted but never read: must not be counted
        service.delete(b.id, user).await.unwrap();
        service.mark_read(c.id, user).await.unwrap();
        service.delete(c.id, user).await.unwrap();

        let list = service.list(tenant, user).await.unwrap();
        let expected = list.iter().filter(|n| !n.is_read_by(user)).count();
        assert_eq!(service.unread_count(tenant, user).await.unwrap(), expected);
        assert_eq!(expected, 1);
    }

    #[tokio::test]
    async fn other_tenant_records_never_listed() {
        let (service, gym_a) = setup().await;
        let gym_b = Uuid::new_v4();
        service.register_tenant(gym_b, "Uptown Gym").await.unwrap();
        let n = announce(&service, gym_a, "Members only").await;

        for _ in 0..3 {
            let user = Uuid::new_v4();
            let listed = service.list(gym_b, user).await.unwrap();
            assert!(listed.iter().all(|r| r.id != n.id));
        }
    }

    #[tokio::test]
    async fn dismissal_is_per_recipient() {
        let (service, tenant) = setup().await;
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let n = announce(&service, tenant, "New class").await;

        service.delete(n.id, u1).await.unwrap();

        assert!(service.list(tenant, u1).await.unwrap().is_empty());
        assert_eq!(service.list(tenant, u2).await.unwrap()[0].id, n.id);
    }

    #[tokio::test]
    async fn read_then_delete_scenario() {
        let (service, t1) = setup().await;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let n1 = announce(&service, t1, "N1").await;

        let before = service.unread_count(t1, a).await.unwrap();
        service.mark_read(n1.id, a).await.unwrap();
        assert_eq!(service.unread_count(t1, a).await.unwrap(), before - 1);

        let listed = service.list(t1, a).await.unwrap();
        assert_eq!(listed[0].read_by.iter().copied().collect::<Vec<_>>(), vec![a]);

        service.delete(n1.id, b).await.unwrap();
        assert!(service.list(t1, b).await.unwrap().iter().all(|n| n.id != n1.id));
        assert!(service.list(t1, a).await.unwrap().iter().any(|n| n.id == n1.id));
    }

    #[tokio::test]
    async fn unknown_tenant_is_not_found() {
        let (service, _) = setup().await;
        let err = service.list(Uuid::new_v4(), Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TenantNotFound);
        assert!(err.is_not_found());

        let err = service
            .create(Uuid::new_v4(), NotificationType::Info, "t", "m", NotificationAction::None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TenantNotFound);
    }

    #[tokio::test]
    async fn known_tenant_without_records_is_empty() {
        let (service, tenant) = setup().await;
        assert!(service.list(tenant, Uuid::new_v4()).await.unwrap().is_empty());
        assert_eq!(service.unread_count(tenant, Uuid::new_v4()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_notification_is_tolerated() {
        let (service, _) = setup().await;
        service.mark_read(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
        service.delete(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let (service, tenant) = setup().await;
        let first = announce(&service, tenant, "first").await;
        let second = announce(&service, tenant, "second").await;

        let listed = service.list(tenant, Uuid::new_v4()).await.unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn create_rejects_blank_title() {
        let (service, tenant) = setup().await;
        let err = service
            .create(tenant, NotificationType::Info, "   ", "body", NotificationAction::None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn mark_all_read_and_delete_all() {
        let (service, tenant) = setup().await;
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let a = announce(&service, tenant, "a").await;
        announce(&service, tenant, "b").await;
        announce(&service, tenant, "c").await;
        service.mark_read(a.id, user).await.unwrap();

        let outcome = service.mark_all_read(tenant, user).await.unwrap();
        assert_eq!(outcome, BatchOutcome { attempted: 2, applied: 2, failed: 0 });
        assert_eq!(service.unread_count(tenant, user).await.unwrap(), 0);
        assert_eq!(service.unread_count(tenant, other).await.unwrap(), 3);

        let outcome = service.delete_all(tenant, user).await.unwrap();
        assert_eq!(outcome.attempted, 3);
        assert!(outcome.is_complete());
        assert!(service.list(tenant, user).await.unwrap().is_empty());
        assert_eq!(service.list(tenant, other).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn mutations_publish_only_real_changes() {
        let (service, tenant) = setup().await;
        let mut sub = service.feed().subscribe_tenant(tenant);
        let user = Uuid::new_v4();

        let n = announce(&service, tenant, "Feed").await;
        service.mark_read(n.id, user).await.unwrap();
        service.mark_read(n.id, user).await.unwrap();
        service.delete(n.id, user).await.unwrap();

        let mut kinds = Vec::new();
        for _ in 0..3 {
            match sub.next().await {
                Some(FeedItem::Change(evt)) => kinds.push(evt.kind),
                other => panic!("unexpected item: {other:?}"),
            }
        }
        assert_eq!(kinds, vec![ChangeKind::Created, ChangeKind::Updated, ChangeKind::Updated]);
        assert!(sub_is_drained(&mut sub).await);
    }

    async fn sub_is_drained(sub: &mut crate::feed::TenantSubscription) -> bool {
        tokio::time::timeout(std::time::Duration::from_millis(50), sub.next())
            .await
            .is_err()
    }

    /// Delegates to a memory store but fails writes for chosen notifications.
    struct FlakyStore {
        inner: MemoryStore,
        failing: Mutex<HashSet<Uuid>>,
    }

    #[async_trait]
    impl NotificationStore for FlakyStore {
        async fn upsert_tenant(&self, tenant_id: Uuid, name: &str) -> AppResult<bool> {
            self.inner.upsert_tenant(tenant_id, name).await
        }
        async fn tenant_exists(&self, tenant_id: Uuid) -> AppResult<bool> {
            self.inner.tenant_exists(tenant_id).await
        }
        async fn insert_notification(&self, draft: &NotificationDraft) -> AppResult<NotificationRecord> {
            self.inner.insert_notification(draft).await
        }
        async fn tenant_notifications(&self, tenant_id: Uuid) -> AppResult<Vec<NotificationRecord>> {
            self.inner.tenant_notifications(tenant_id).await
        }
        async fn notification_tenant(&self, notification_id: Uuid) -> AppResult<Option<Uuid>> {
            self.inner.notification_tenant(notification_id).await
        }
        async fn add_reader(&self, notification_id: Uuid, user_id: Uuid) -> AppResult<SetAddition> {
            if self.failing.lock().contains(&notification_id) {
                return Err(AppError::internal("connection reset"));
            }
            self.inner.add_reader(notification_id, user_id).await
        }
        async fn add_deleter(&self, notification_id: Uuid, user_id: Uuid) -> AppResult<SetAddition> {
            if self.failing.lock().contains(&notification_id) {
                return Err(AppError::internal("connection reset"));
            }
            self.inner.add_deleter(notification_id, user_id).await
        }
        async fn ping(&self) -> AppResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn batch_tolerates_partial_failure() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failing: Mutex::new(HashSet::new()),
        });
        let service = NotificationService::new(store.clone(), ChangeFeed::new(64));
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();
        service.register_tenant(tenant, "Flaky Gym").await.unwrap();

        let broken = announce(&service, tenant, "broken").await;
        announce(&service, tenant, "fine-1").await;
        announce(&service, tenant, "fine-2").await;
        store.failing.lock().insert(broken.id);

        let outcome = service.mark_all_read(tenant, user).await.unwrap();
        assert_eq!(outcome, BatchOutcome { attempted: 3, applied: 2, failed: 1 });
        // the single-item call propagates the failure
        assert!(service.mark_read(broken.id, user).await.is_err());
        assert_eq!(service.unread_count(tenant, user).await.unwrap(), 1);

        let outcome = service.delete_all(tenant, user).await.unwrap();
        assert_eq!(outcome.failed, 1);
        let remaining = service.list(tenant, user).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, broken.id);
    }
}
