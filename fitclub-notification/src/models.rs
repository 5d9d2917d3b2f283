use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use fitclub_shared::errors::{AppError, AppResult};
use fitclub_shared::types::{
    NotificationAction, NotificationRecord, NotificationType, Platform, PushTokenRecord,
};

use crate::schema::{notification_deletions, notification_reads, notifications, push_tokens, tenants};

/// Fields supplied by the caller when creating a notification.
#[derive(Debug, Clone)]
pub struct NotificationDraft {
    pub tenant_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub action: NotificationAction,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tenants)]
pub struct NewTenant {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Queryable, Selectable, Identifiable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub action: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn into_record(self, read_by: BTreeSet<Uuid>, deleted_by: BTreeSet<Uuid>) -> NotificationRecord {
        let notification_type = self.notification_type.parse().unwrap_or_else(|e| {
            tracing::warn!(notification_id = %self.id, error = %e, "unknown notification type, using info");
            NotificationType::Info
        });
        let action = self
            .action
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();

        NotificationRecord {
            id: self.id,
            tenant_id: self.tenant_id,
            notification_type,
            title: self.title,
            message: self.message,
            action,
            read_by,
            deleted_by,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub action: Option<serde_json::Value>,
}

impl NewNotification {
    pub fn from_draft(draft: &NotificationDraft) -> Self {
        let action = if draft.action.is_none() {
            None
        } else {
            serde_json::to_value(&draft.action).ok()
        };

        Self {
            id: Uuid::now_v7(),
            tenant_id: draft.tenant_id,
            notification_type: draft.notification_type.as_str().to_string(),
            title: draft.title.clone(),
            message: draft.message.clone(),
            action,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notification_reads)]
pub struct NewRead {
    pub notification_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notification_deletions)]
pub struct NewDeletion {
    pub notification_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Queryable, Selectable, Identifiable)]
#[diesel(table_name = push_tokens)]
pub struct PushToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub platform: String,
    pub last_registered_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PushToken> for PushTokenRecord {
    type Error = AppError;

    fn try_from(row: PushToken) -> AppResult<Self> {
        let platform: Platform = row.platform.parse().map_err(|e: String| {
            tracing::error!(push_token_id = %row.id, error = %e, "stored push token has invalid platform");
            AppError::internal("invalid stored platform")
        })?;

        Ok(PushTokenRecord {
            id: row.id,
            user_id: row.user_id,
            token: row.token,
            platform,
            last_registered_at: row.last_registered_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = push_tokens)]
pub struct NewPushToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub platform: String,
}
