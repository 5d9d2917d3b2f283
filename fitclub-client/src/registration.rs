use std::sync::Arc;

use futures::stream::BoxStream;
use tokio::sync::watch;
use uuid::Uuid;

use fitclub_shared::types::RegistrationOutcome;

use crate::backend::{PermissionStatus, PushPlatform, PushTokenBackend};
use crate::error::ClientResult;

/// How one registration run ended. None of these block the app; every
/// non-success is retried on the next session start or token rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationResult {
    PermissionDenied,
    TokenUnavailable,
    AlreadyRegistered,
    Registered(RegistrationOutcome),
    Failed,
}

impl RegistrationResult {
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::AlreadyRegistered | Self::Registered(_))
    }
}

/// Diagnostics for settings screens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushStatus {
    pub user_id: Option<Uuid>,
    pub push_token: Option<String>,
    pub is_push_registered: bool,
}

pub struct PushRegistrationController {
    platform: Arc<dyn PushPlatform>,
    registry: Arc<dyn PushTokenBackend>,
    status: watch::Sender<PushStatus>,
}

impl PushRegistrationController {
    pub fn new(platform: Arc<dyn PushPlatform>, registry: Arc<dyn PushTokenBackend>) -> Self {
        let (status, _) = watch::channel(PushStatus::default());
        Self {
            platform,
            registry,
            status,
        }
    }

    pub fn status(&self) -> watch::Receiver<PushStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> PushStatus {
        self.status.borrow().clone()
    }

    pub fn token_rotations(&self) -> BoxStream<'static, String> {
        self.platform.token_rotations()
    }

    /// Session start: permission, token, existence check, register.
    pub async fn start_session(&self, user_id: Uuid) -> RegistrationResult {
        match self.platform.request_permission().await {
            Ok(PermissionStatus::Granted) => {}
            Ok(PermissionStatus::Denied) => {
                tracing::info!(user_id = %user_id, "push permission denied");
                self.status.send_replace(PushStatus {
                    user_id: Some(user_id),
                    ..PushStatus::default()
                });
                return RegistrationResult::PermissionDenied;
            }
            Err(e) => {
                tracing::warn!(error = %e, user_id = %user_id, "push permission request failed");
                self.status.send_replace(PushStatus {
                    user_id: Some(user_id),
                    ..PushStatus::default()
                });
                return RegistrationResult::Failed;
            }
        }

        let token = match self.platform.device_token().await {
            Ok(token) if !token.trim().is_empty() => token,
            Ok(_) => {
                tracing::warn!(user_id = %user_id, "platform returned an empty push token");
                return RegistrationResult::TokenUnavailable;
            }
            Err(e) => {
                tracing::warn!(error = %e, user_id = %user_id, "push token unavailable");
                return RegistrationResult::TokenUnavailable;
            }
        };

        self.status.send_replace(PushStatus {
            user_id: Some(user_id),
            push_token: Some(token.clone()),
            is_push_registered: false,
        });

        self.reconcile(user_id, &token).await
    }

    /// The platform rotated the device token. Registers the new token and
    /// drops the stale one on a best-effort basis.
    pub async fn token_changed(&self, user_id: Uuid, new_token: &str) -> RegistrationResult {
        let previous = self.current_status();

        self.status.send_replace(PushStatus {
            user_id: Some(user_id),
            push_token: Some(new_token.to_string()),
            is_push_registered: false,
        });

        let result = self.reconcile(user_id, new_token).await;

        let stale = previous
            .push_token
            .filter(|old| previous.user_id == Some(user_id) && old != new_token);
        if let Some(old) = stale {
            if let Err(e) = self.registry.remove_token(user_id, &old).await {
                tracing::warn!(error = %e, user_id = %user_id, "failed to remove rotated push token");
            }
        }

        result
    }

    async fn reconcile(&self, user_id: Uuid, token: &str) -> RegistrationResult {
        match self.registry.is_token_registered(user_id, token).await {
            Ok(true) => {
                tracing::debug!(user_id = %user_id, "push token already registered");
                self.mark_registered(user_id, token);
                return RegistrationResult::AlreadyRegistered;
            }
            Ok(false) => {}
            // registration is idempotent, so a failed check is not fatal
            Err(e) => tracing::warn!(error = %e, user_id = %user_id, "push token check failed, registering anyway"),
        }

        match self.registry.register_token(user_id, token, self.platform.platform()).await {
            Ok(outcome) => {
                tracing::info!(user_id = %user_id, outcome = ?outcome, "push token registered");
                self.mark_registered(user_id, token);
                RegistrationResult::Registered(outcome)
            }
            Err(e) => {
                tracing::warn!(error = %e, user_id = %user_id, retryable = e.is_retryable(), "push token registration failed");
                RegistrationResult::Failed
            }
        }
    }

    fn mark_registered(&self, user_id: Uuid, token: &str) {
        self.status.send_if_modified(|status| {
            if status.user_id == Some(user_id) && status.push_token.as_deref() == Some(token) {
                status.is_push_registered = true;
                true
            } else {
                false
            }
        });
    }

    /// Logout on this device: remove the current device token from the
    /// registry. Needs the user's credentials, so run it before they are
    /// dropped.
    pub async fn end_session(&self, user_id: Uuid) {
        let status = self.current_status();
        if status.user_id == Some(user_id) {
            if let Some(token) = status.push_token.as_deref() {
                match self.registry.remove_token(user_id, token).await {
                    Ok(removed) => tracing::info!(user_id = %user_id, removed, "device push token removed"),
                    Err(e) => tracing::warn!(error = %e, user_id = %user_id, "failed to remove device push token"),
                }
            }
        }
        self.status.send_replace(PushStatus::default());
    }

    /// Drop local push state without calling the registry.
    pub fn forget_session(&self) {
        self.status.send_replace(PushStatus::default());
    }

    /// Forget every device of the user.
    pub async fn revoke_all(&self, user_id: Uuid) -> ClientResult<bool> {
        let removed = self.registry.remove_all_tokens(user_id).await?;
        self.status.send_if_modified(|status| {
            if status.user_id == Some(user_id) {
                status.is_push_registered = false;
                true
            } else {
                false
            }
        });
        tracing::info!(user_id = %user_id, removed, "push tokens revoked");
        Ok(removed)
    }
}
