//! Seams between the client runtime and everything it talks to.
//!
//! The notification and push-token traits mirror the service operations.
//! `user_id` is passed explicitly so an in-process service can be plugged in;
//! the HTTP backend relies on the bearer token instead.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use uuid::Uuid;

use fitclub_shared::types::{BatchOutcome, ChangeEvent, NotificationRecord, Platform, RegistrationOutcome};

use crate::error::ClientResult;

#[async_trait]
pub trait NotificationBackend: Send + Sync {
    async fn list(&self, tenant_id: Uuid, user_id: Uuid) -> ClientResult<Vec<NotificationRecord>>;
    async fn unread_count(&self, tenant_id: Uuid, user_id: Uuid) -> ClientResult<usize>;
    async fn mark_read(&self, notification_id: Uuid, user_id: Uuid) -> ClientResult<()>;
    async fn mark_all_read(&self, tenant_id: Uuid, user_id: Uuid) -> ClientResult<BatchOutcome>;
    async fn delete(&self, notification_id: Uuid, user_id: Uuid) -> ClientResult<()>;
    async fn delete_all(&self, tenant_id: Uuid, user_id: Uuid) -> ClientResult<BatchOutcome>;
}

#[async_trait]
pub trait PushTokenBackend: Send + Sync {
    async fn register_token(
        &self,
        user_id: Uuid,
        token: &str,
        platform: Platform,
    ) -> ClientResult<RegistrationOutcome>;
    async fn is_token_registered(&self, user_id: Uuid, token: &str) -> ClientResult<bool>;
    async fn remove_token(&self, user_id: Uuid, token: &str) -> ClientResult<bool>;
    async fn remove_all_tokens(&self, user_id: Uuid) -> ClientResult<bool>;
}

/// What a change-feed subscriber sees. Both variants mean "re-fetch".
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal {
    Change(ChangeEvent),
    /// Events were dropped upstream.
    Resync,
}

pub type ChangeStream = BoxStream<'static, FeedSignal>;

#[async_trait]
pub trait ChangeFeedSource: Send + Sync {
    /// Subscribe to one tenant's notification collection. The stream ends
    /// when the upstream connection closes.
    async fn subscribe(&self, tenant_id: Uuid) -> ClientResult<ChangeStream>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Platform push API (APNs, FCM, web push). Treated as a black box.
#[async_trait]
pub trait PushPlatform: Send + Sync {
    fn platform(&self) -> Platform;
    async fn request_permission(&self) -> ClientResult<PermissionStatus>;
    async fn device_token(&self) -> ClientResult<String>;

    /// Tokens the platform issues after the initial one, in order. Platforms
    /// that never rotate keep the default.
    fn token_rotations(&self) -> BoxStream<'static, String> {
        stream::pending().boxed()
    }
}
