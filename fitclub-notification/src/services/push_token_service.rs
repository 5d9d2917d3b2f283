use std::sync::Arc;

use metrics::counter;
use uuid::Uuid;

use fitclub_shared::errors::{AppError, AppResult, ErrorCode};
use fitclub_shared::types::{Platform, PushTokenRecord, RegistrationOutcome};

use crate::store::PushTokenStore;

/// Upper bound on accepted token length. APNs and FCM tokens are well below it.
const MAX_TOKEN_LEN: usize = 4096;

/// Registry of device push tokens. One user may hold any number of tokens;
/// the `(user, token)` pair is unique.
#[derive(Clone)]
pub struct PushTokenRegistry {
    store: Arc<dyn PushTokenStore>,
}

fn normalize(token: &str) -> AppResult<&str> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::new(ErrorCode::ValidationError, "push token must not be empty"));
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(AppError::new(ErrorCode::PushTokenInvalid, "push token is too long"));
    }
    Ok(token)
}

impl PushTokenRegistry {
    pub fn new(store: Arc<dyn PushTokenStore>) -> Self {
        Self { store }
    }

    pub async fn register_token(
        &self,
        user_id: Uuid,
        token: &str,
        platform: Platform,
    ) -> AppResult<(PushTokenRecord, RegistrationOutcome)> {
        let token = normalize(token)?;
        let (record, outcome) = self.store.upsert_token(user_id, token, platform).await?;

        counter!("push_token_registrations_total", "outcome" => match outcome {
            RegistrationOutcome::Created => "created",
            RegistrationOutcome::Existing => "existing",
        })
        .increment(1);

        tracing::info!(
            user_id = %user_id,
            platform = %platform,
            outcome = ?outcome,
            "push token registered"
        );
        Ok((record, outcome))
    }

    pub async fn is_token_registered(&self, user_id: Uuid, token: &str) -> AppResult<bool> {
        let token = normalize(token)?;
        Ok(self.store.find_token(user_id, token).await?.is_some())
    }

    /// Remove one device token. Returns whether a record existed.
    pub async fn remove_token(&self, user_id: Uuid, token: &str) -> AppResult<bool> {
        let token = normalize(token)?;
        let removed = self.store.delete_token(user_id, token).await?;
        if removed {
            tracing::info!(user_id = %user_id, "push token removed");
        } else {
            tracing::debug!(user_id = %user_id, "push token was not registered");
        }
        Ok(removed)
    }

    /// Remove every token of the user. Returns `true` if anything was removed.
    pub async fn remove_all_tokens(&self, user_id: Uuid) -> AppResult<bool> {
        let removed = self.store.delete_all_tokens(user_id).await?;
        tracing::info!(user_id = %user_id, removed, "push tokens revoked");
        Ok(removed > 0)
    }

    pub async fn list_tokens(&self, user_id: Uuid) -> AppResult<Vec<PushTokenRecord>> {
        self.store.tokens_for_user(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> PushTokenRegistry {
        PushTokenRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn reregistration_never_duplicates() {
        let registry = registry();
        let user = Uuid::new_v4();

        let (first, outcome) = registry.register_token(user, "fcm-abc", Platform::Android).await.unwrap();
        assert_eq!(outcome, RegistrationOutcome::Created);

        let (second, outcome) = registry.register_token(user, "fcm-abc", Platform::Android).await.unwrap();
        assert_eq!(outcome, RegistrationOutcome::Existing);
        assert_eq!(first.id, second.id);

        let tokens = registry.list_tokens(user).await.unwrap();
        assert_eq!(tokens.iter().filter(|t| t.token == "fcm-abc").count(), 1);
    }

    #[tokio::test]
    async fn two_devices_then_logout_one() {
        let registry = registry();
        let user = Uuid::new_v4();

        registry.register_token(user, "T1", Platform::Ios).await.unwrap();
        registry.register_token(user, "T2", Platform::Android).await.unwrap();
        assert_eq!(registry.list_tokens(user).await.unwrap().len(), 2);

        assert!(registry.remove_token(user, "T1").await.unwrap());
        let tokens = registry.list_tokens(user).await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].token, "T2");

        assert!(!registry.remove_token(user, "T1").await.unwrap());
    }

    #[tokio::test]
    async fn revoke_removes_everything() {
        let registry = registry();
        let user = Uuid::new_v4();
        registry.register_token(user, "T1", Platform::Ios).await.unwrap();
        registry.register_token(user, "T2", Platform::Web).await.unwrap();

        assert!(registry.remove_all_tokens(user).await.unwrap());
        assert!(!registry.is_token_registered(user, "T1").await.unwrap());
        assert!(!registry.remove_all_tokens(user).await.unwrap());
    }

    #[tokio::test]
    async fn tokens_are_scoped_per_user() {
        let registry = registry();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        registry.register_token(alice, "shared-device", Platform::Ios).await.unwrap();

        assert!(registry.is_token_registered(alice, "shared-device").await.unwrap());
        assert!(!registry.is_token_registered(bob, "shared-device").await.unwrap());
    }

    #[tokio::test]
    async fn blank_token_rejected() {
        let registry = registry();
        let err = registry
            .register_token(Uuid::new_v4(), "   ", Platform::Ios)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);

        let long = "x".repeat(MAX_TOKEN_LEN + 1);
        let err = registry
            .register_token(Uuid::new_v4(), &long, Platform::Ios)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PushTokenInvalid);
    }

    #[tokio::test]
    async fn surrounding_whitespace_is_ignored() {
        let registry = registry();
        let user = Uuid::new_v4();
        registry.register_token(user, " tok \n", Platform::Web).await.unwrap();
        assert!(registry.is_token_registered(user, "tok").await.unwrap());
    }
}
