// Realtime change feed vocabulary.
//
// A `ChangeEvent` says "something in this tenant's notification collection
// changed". Payload fidelity is not guaranteed, so the only safe reaction on
// the receiving side is to re-fetch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const NOTIFICATIONS_COLLECTION: &str = "notifications";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    /// Stable string used in SSE `event:` fields and broker routing keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: Uuid,
    pub collection: String,
    pub kind: ChangeKind,
    pub tenant_id: Uuid,
    pub document_id: Uuid,
    /// Instance that produced the change; used to stop broker echo loops.
    pub origin: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn notification(origin: Uuid, kind: ChangeKind, tenant_id: Uuid, document_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            collection: NOTIFICATIONS_COLLECTION.to_string(),
            kind,
            tenant_id,
            document_id,
            origin,
            timestamp: Utc::now(),
        }
    }

    pub fn is_for_tenant(&self, tenant_id: Uuid) -> bool {
        self.tenant_id == tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json_shape() {
        let tenant = Uuid::new_v4();
        let evt = ChangeEvent::notification(Uuid::new_v4(), ChangeKind::Updated, tenant, Uuid::new_v4());
        let value = serde_json::to_value(&evt).unwrap();

        assert_eq!(value["kind"], "updated");
        assert_eq!(value["collection"], "notifications");
        assert!(evt.is_for_tenant(tenant));
    }
}
