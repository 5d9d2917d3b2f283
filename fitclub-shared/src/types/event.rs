use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RabbitMQ Event envelope wrapping all domain events.
///
/// Routing key format: `fitclub.{domain}.{entity}.{action}`
/// Example: `fitclub.notification.document.updated`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T: Serialize> {
    pub id: Uuid,
    pub source: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub data: T,
}

impl<T: Serialize> Event<T> {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, data: T) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            correlation_id: None,
            user_id: None,
            data,
        }
    }
}

/// RabbitMQ routing keys
pub mod routing_keys {
    use crate::types::change::ChangeKind;

    // Tenant events
    pub const TENANT_CREATED: &str = "fitclub.tenant.created";

    // Auth events
    pub const AUTH_ACCOUNT_DELETED: &str = "fitclub.auth.account.deleted";

    // Notification events
    pub const NOTIFICATION_BROADCAST_REQUESTED: &str = "fitclub.notification.broadcast.requested";
    pub const NOTIFICATION_DOCUMENT_CREATED: &str = "fitclub.notification.document.created";
    pub const NOTIFICATION_DOCUMENT_UPDATED: &str = "fitclub.notification.document.updated";
    pub const NOTIFICATION_DOCUMENT_DELETED: &str = "fitclub.notification.document.deleted";
    pub const NOTIFICATION_DOCUMENT_ALL: &str = "fitclub.notification.document.*";

    pub fn notification_document(kind: ChangeKind) -> &'static str {
        match kind {
            ChangeKind::Created => NOTIFICATION_DOCUMENT_CREATED,
            ChangeKind::Updated => NOTIFICATION_DOCUMENT_UPDATED,
            ChangeKind::Deleted => NOTIFICATION_DOCUMENT_DELETED,
        }
    }
}

/// Common event data payloads
pub mod payloads {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    use crate::types::notification::{NotificationAction, NotificationType};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TenantCreated {
        pub tenant_id: Uuid,
        pub name: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AccountDeleted {
        pub user_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct BroadcastRequested {
        pub tenant_id: Uuid,
        #[serde(rename = "type", default)]
        pub notification_type: NotificationType,
        pub title: String,
        pub message: String,
        #[serde(default)]
        pub action: NotificationAction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::change::ChangeKind;

    #[test]
    fn document_routing_keys() {
        assert_eq!(
            routing_keys::notification_document(ChangeKind::Deleted),
            "fitclub.notification.document.deleted"
        );
    }

    #[test]
    fn broadcast_payload_defaults() {
        let json = r#"{"tenant_id":"00000000-0000-0000-0000-000000000000","title":"Hi","message":"Welcome"}"#;
        let payload: payloads::BroadcastRequested = serde_json::from_str(json).unwrap();
        assert_eq!(payload.notification_type, crate::types::NotificationType::Info);
        assert!(payload.action.is_none());
    }
}
