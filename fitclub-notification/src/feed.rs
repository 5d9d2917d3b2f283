// Realtime change feed.
//
// Every state change on the notification collection is published as a
// `ChangeEvent` on a `tokio::sync::broadcast` channel. Consumers are the SSE
// endpoint (one subscription per connected client, filtered by tenant) and
// the broker bridge that forwards local changes to peer instances.

use tokio::sync::broadcast;
use uuid::Uuid;

use fitclub_shared::types::{ChangeEvent, ChangeKind};

pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Cheap to clone; all clones share one channel and one origin id.
#[derive(Clone)]
pub struct ChangeFeed {
    origin: Uuid,
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            origin: Uuid::new_v4(),
            tx,
        }
    }

    /// Identifier of this service instance.
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// Record a local change to a notification document.
    pub fn record(&self, kind: ChangeKind, tenant_id: Uuid, document_id: Uuid) -> usize {
        self.emit(ChangeEvent::notification(self.origin, kind, tenant_id, document_id))
    }

    /// Publish an event. Returns the number of receivers; zero receivers is
    /// normal when no client is connected.
    pub fn emit(&self, event: ChangeEvent) -> usize {
        tracing::debug!(
            kind = %event.kind,
            tenant_id = %event.tenant_id,
            document_id = %event.document_id,
            "change emitted"
        );
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn subscribe_tenant(&self, tenant_id: Uuid) -> TenantSubscription {
        TenantSubscription {
            tenant_id,
            rx: self.tx.subscribe(),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Change(ChangeEvent),
    /// The subscriber fell behind and `skipped` events were dropped. The
    /// receiver must re-fetch.
    Lagged { skipped: u64 },
}

/// A subscription that only yields events for one tenant.
pub struct TenantSubscription {
    tenant_id: Uuid,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl TenantSubscription {
    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    /// Next item for this tenant, or `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<FeedItem> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.is_for_tenant(self.tenant_id) => return Some(FeedItem::Change(event)),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(tenant_id = %self.tenant_id, skipped, "change subscriber lagged");
                    return Some(FeedItem::Lagged { skipped });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
