use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Presentation hint only; carries no behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "success" => Ok(Self::Success),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            _ => Err(format!("unknown notification type: {s}")),
        }
    }
}

/// Optional client-side navigation hint attached to a notification.
///
/// ```json
/// { "kind": "navigate", "route": "/classes/detail", "params": { "class_id": "..." } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NotificationAction {
    #[default]
    None,
    Navigate {
        route: String,
        #[serde(default)]
        params: BTreeMap<String, String>,
    },
}

impl NotificationAction {
    pub fn navigate(route: impl Into<String>) -> Self {
        Self::Navigate {
            route: route.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// A tenant-broadcast notification together with its per-recipient state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "NotificationAction::is_none")]
    pub action: NotificationAction,
    #[serde(default)]
    pub read_by: BTreeSet<Uuid>,
    #[serde(default)]
    pub deleted_by: BTreeSet<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn is_read_by(&self, user_id: Uuid) -> bool {
        self.read_by.contains(&user_id)
    }

    pub fn is_deleted_by(&self, user_id: Uuid) -> bool {
        self.deleted_by.contains(&user_id)
    }

    /// Visible to `user_id` when it belongs to `tenant_id` and the user has
    /// not dismissed it.
    pub fn is_visible_to(&self, tenant_id: Uuid, user_id: Uuid) -> bool {
        self.tenant_id == tenant_id && !self.is_deleted_by(user_id)
    }

    /// Unread for `user_id`: visible and not yet acknowledged.
    pub fn is_unread_for(&self, tenant_id: Uuid, user_id: Uuid) -> bool {
        self.is_visible_to(tenant_id, user_id) && !self.is_read_by(user_id)
    }
}

/// Display order: newest first, ties broken by id so the order is total.
pub fn display_order(a: &NotificationRecord, b: &NotificationRecord) -> Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

/// Result of a tenant-wide mark-all/delete-all pass. Callers re-query for the
/// final state; this is diagnostic only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub applied: usize,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(tenant_id: Uuid, created_at: DateTime<Utc>) -> NotificationRecord {
        NotificationRecord {
            id: Uuid::now_v7(),
            tenant_id,
            notification_type: NotificationType::Info,
            title: "Pool closed".into(),
            message: "The pool is closed for maintenance".into(),
            action: NotificationAction::None,
            read_by: BTreeSet::new(),
            deleted_by: BTreeSet::new(),
            created_at,
        }
    }

    #[test]
    fn deleted_but_unread_is_not_unread() {
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut n = record(tenant, Utc::now());
        assert!(n.is_unread_for(tenant, user));

        n.deleted_by.insert(user);
        assert!(!n.is_visible_to(tenant, user));
        assert!(!n.is_unread_for(tenant, user));
    }

    #[test]
    fn other_tenant_never_visible() {
        let n = record(Uuid::new_v4(), Utc::now());
        assert!(!n.is_visible_to(Uuid::new_v4(), Uuid::new_v4()));
    }

    #[test]
    fn display_order_is_newest_first() {
        let tenant = Uuid::new_v4();
        let now = Utc::now();
        let mut items = vec![
            record(tenant, now - Duration::minutes(5)),
            record(tenant, now),
            record(tenant, now - Duration::minutes(1)),
        ];
        items.sort_by(display_order);
        assert_eq!(items[0].created_at, now);
        assert_eq!(items[2].created_at, now - Duration::minutes(5));
    }

    #[test]
    fn wire_format_uses_type_and_tagged_action() {
        let mut n = record(Uuid::new_v4(), Utc::now());
        n.notification_type = NotificationType::Warning;
        n.action = NotificationAction::navigate("/classes");

        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["type"], "warning");
        assert_eq!(value["action"]["kind"], "navigate");
        assert_eq!(value["action"]["route"], "/classes");

        let plain = serde_json::to_value(record(Uuid::new_v4(), Utc::now())).unwrap();
        assert!(plain.get("action").is_none());
    }

    #[test]
    fn notification_type_parses() {
        assert_eq!("Success".parse::<NotificationType>().unwrap(), NotificationType::Success);
        assert!("urgent".parse::<NotificationType>().is_err());
    }
}
