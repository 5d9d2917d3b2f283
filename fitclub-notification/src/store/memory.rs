use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use fitclub_shared::errors::AppResult;
use fitclub_shared::types::{NotificationRecord, Platform, PushTokenRecord, RegistrationOutcome};

use super::{NotificationStore, PushTokenStore, SetAddition};
use crate::models::NotificationDraft;

/// Process-local store used by the `memory` backend and by tests.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    tenants: HashMap<Uuid, String>,
    notifications: HashMap<Uuid, NotificationRecord>,
    push_tokens: HashMap<(Uuid, String), PushTokenRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_member(
        &self,
        notification_id: Uuid,
        select: impl FnOnce(&mut NotificationRecord) -> &mut BTreeSet<Uuid>,
        user_id: Uuid,
    ) -> SetAddition {
        let mut state = self.state.write();
        let Some(record) = state.notifications.get_mut(&notification_id) else {
            return SetAddition::MissingDocument;
        };
        let tenant_id = record.tenant_id;
        if select(record).insert(user_id) {
            SetAddition::Added { tenant_id }
        } else {
            SetAddition::AlreadyPresent
        }
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn upsert_tenant(&self, tenant_id: Uuid, name: &str) -> AppResult<bool> {
        let mut state = self.state.write();
        if state.tenants.contains_key(&tenant_id) {
            return Ok(false);
        }
        state.tenants.insert(tenant_id, name.to_string());
        Ok(true)
    }

    async fn tenant_exists(&self, tenant_id: Uuid) -> AppResult<bool> {
        Ok(self.state.read().tenants.contains_key(&tenant_id))
    }

    async fn insert_notification(&self, draft: &NotificationDraft) -> AppResult<NotificationRecord> {
        let record = NotificationRecord {
            id: Uuid::now_v7(),
            tenant_id: draft.tenant_id,
            notification_type: draft.notification_type,
            title: draft.title.clone(),
            message: draft.message.clone(),
            action: draft.action.clone(),
            read_by: BTreeSet::new(),
            deleted_by: BTreeSet::new(),
            created_at: Utc::now(),
        };
        self.state.write().notifications.insert(record.id, record.clone());
        Ok(record)
    }

    async fn tenant_notifications(&self, tenant_id: Uuid) -> AppResult<Vec<NotificationRecord>> {
        Ok(self
            .state
            .read()
            .notifications
            .values()
            .filter(|n| n.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn notification_tenant(&self, notification_id: Uuid) -> AppResult<Option<Uuid>> {
        Ok(self.state.read().notifications.get(&notification_id).map(|n| n.tenant_id))
    }

    async fn add_reader(&self, notification_id: Uuid, user_id: Uuid) -> AppResult<SetAddition> {
        Ok(self.add_member(notification_id, |n| &mut n.read_by, user_id))
    }

    async fn add_deleter(&self, notification_id: Uuid, user_id: Uuid) -> AppResult<SetAddition> {
        Ok(self.add_member(notification_id, |n| &mut n.deleted_by, user_id))
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl PushTokenStore for MemoryStore {
    async fn find_token(&self, user_id: Uuid, token: &str) -> AppResult<Option<PushTokenRecord>> {
        Ok(self.state.read().push_tokens.get(&(user_id, token.to_string())).cloned())
    }

    async fn upsert_token(
        &self,
        user_id: Uuid,
        token: &str,
        platform: Platform,
    ) -> AppResult<(PushTokenRecord, RegistrationOutcome)> {
        let now = Utc::now();
        let mut state = self.state.write();
        let key = (user_id, token.to_string());

        if let Some(existing) = state.push_tokens.get_mut(&key) {
            existing.last_registered_at = now;
            existing.platform = platform;
            return Ok((existing.clone(), RegistrationOutcome::Existing));
        }

        let record = PushTokenRecord {
            id: Uuid::now_v7(),
            user_id,
            token: token.to_string(),
            platform,
            last_registered_at: now,
            created_at: now,
        };
        state.push_tokens.insert(key, record.clone());
        Ok((record, RegistrationOutcome::Created))
    }

    async fn delete_token(&self, user_id: Uuid, token: &str) -> AppResult<bool> {
        Ok(self.state.write().push_tokens.remove(&(user_id, token.to_string())).is_some())
    }

    async fn delete_all_tokens(&self, user_id: Uuid) -> AppResult<usize> {
        let mut state = self.state.write();
        let before = state.push_tokens.len();
        state.push_tokens.retain(|(owner, _), _| *owner != user_id);
        Ok(before - state.push_tokens.len())
    }

    async fn tokens_for_user(&self, user_id: Uuid) -> AppResult<Vec<PushTokenRecord>> {
        let mut tokens: Vec<PushTokenRecord> = self
            .state
            .read()
            .push_tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.last_registered_at.cmp(&a.last_registered_at));
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitclub_shared::types::{NotificationAction, NotificationType};

    fn draft(tenant_id: Uuid) -> NotificationDraft {
        NotificationDraft {
            tenant_id,
            notification_type: NotificationType::Success,
            title: "Booking confirmed".into(),
            message: "See you at spin class".into(),
            action: NotificationAction::None,
        }
    }

    #[tokio::test]
    async fn set_addition_reports_membership() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();
        let n = store.insert_notification(&draft(tenant)).await.unwrap();

        assert_eq!(store.add_reader(n.id, user).await.unwrap(), SetAddition::Added { tenant_id: tenant });
        assert_eq!(store.add_reader(n.id, user).await.unwrap(), SetAddition::AlreadyPresent);
        assert_eq!(store.add_deleter(Uuid::new_v4(), user).await.unwrap(), SetAddition::MissingDocument);
    }

    #[tokio::test]
    async fn delete_all_tokens_only_touches_owner() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        store.upsert_token(alice, "a-phone", Platform::Ios).await.unwrap();
        store.upsert_token(alice, "a-tablet", Platform::Android).await.unwrap();
        store.upsert_token(bob, "b-phone", Platform::Android).await.unwrap();

        assert_eq!(store.delete_all_tokens(alice).await.unwrap(), 2);
        assert!(store.tokens_for_user(alice).await.unwrap().is_empty());
        assert_eq!(store.tokens_for_user(bob).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upsert_refreshes_platform() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let (first, outcome) = store.upsert_token(user, "tok", Platform::Web).await.unwrap();
        assert_eq!(outcome, RegistrationOutcome::Created);

        let (second, outcome) = store.upsert_token(user, "tok", Platform::Android).await.unwrap();
        assert_eq!(outcome, RegistrationOutcome::Existing);
        assert_eq!(first.id, second.id);
        assert_eq!(second.platform, Platform::Android);
        assert!(second.last_registered_at >= first.last_registered_at);
    }
}
