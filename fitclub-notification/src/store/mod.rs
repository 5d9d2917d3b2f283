//! Persistence seams for notifications and push tokens.
//!
//! Per-recipient state is modelled as set membership. Additions are
//! idempotent and commute, so concurrent writers on different devices never
//! conflict and no client-side locking is needed.

use async_trait::async_trait;
use uuid::Uuid;

use fitclub_shared::errors::AppResult;
use fitclub_shared::types::{NotificationRecord, Platform, PushTokenRecord, RegistrationOutcome};

use crate::models::NotificationDraft;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result of an idempotent set-addition against a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetAddition {
    /// The user was newly added; carries the notification's tenant.
    Added { tenant_id: Uuid },
    /// The user was already a member of the set.
    AlreadyPresent,
    /// No notification with that id exists.
    MissingDocument,
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Register a tenant. Returns `true` if it did not exist before.
    async fn upsert_tenant(&self, tenant_id: Uuid, name: &str) -> AppResult<bool>;
    async fn tenant_exists(&self, tenant_id: Uuid) -> AppResult<bool>;

    async fn insert_notification(&self, draft: &NotificationDraft) -> AppResult<NotificationRecord>;
    /// Every record of the tenant with full `read_by`/`deleted_by` sets, in
    /// no particular order.
    async fn tenant_notifications(&self, tenant_id: Uuid) -> AppResult<Vec<NotificationRecord>>;
    async fn notification_tenant(&self, notification_id: Uuid) -> AppResult<Option<Uuid>>;

    async fn add_reader(&self, notification_id: Uuid, user_id: Uuid) -> AppResult<SetAddition>;
    async fn add_deleter(&self, notification_id: Uuid, user_id: Uuid) -> AppResult<SetAddition>;

    async fn ping(&self) -> AppResult<()>;
}

#[async_trait]
pub trait PushTokenStore: Send + Sync {
    async fn find_token(&self, user_id: Uuid, token: &str) -> AppResult<Option<PushTokenRecord>>;
    /// Insert `(user_id, token)` or refresh `last_registered_at` if present.
    /// Never creates a second record for the same pair.
    async fn upsert_token(
        &self,
        user_id: Uuid,
        token: &str,
        platform: Platform,
    ) -> AppResult<(PushTokenRecord, RegistrationOutcome)>;
    async fn delete_token(&self, user_id: Uuid, token: &str) -> AppResult<bool>;
    async fn delete_all_tokens(&self, user_id: Uuid) -> AppResult<usize>;
    async fn tokens_for_user(&self, user_id: Uuid) -> AppResult<Vec<PushTokenRecord>>;
}
