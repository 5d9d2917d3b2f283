// GET /notifications/stream?tenant_id=<uuid>
//
// Server-Sent Events view of the change feed for one tenant. Each frame is
//
//   event: created | updated | deleted
//   id:    <change event id>
//   data:  <ChangeEvent json>
//
// A subscriber that falls behind the broadcast buffer receives a single
// `resync` frame instead of the dropped events. Clients treat every frame
// the same way: re-fetch the list and the unread count.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::Stream;

use fitclub_shared::errors::AppResult;
use fitclub_shared::middleware::require_tenant;
use fitclub_shared::types::AuthUser;

use super::notifications::TenantQuery;
use crate::feed::FeedItem;
use crate::AppState;

pub const RESYNC_EVENT: &str = "resync";

fn to_sse(item: FeedItem) -> Option<SseEvent> {
    match item {
        FeedItem::Change(change) => match serde_json::to_string(&change) {
            Ok(json) => Some(
                SseEvent::default()
                    .event(change.kind.as_str())
                    .id(change.id.to_string())
                    .data(json),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize change event");
                None
            }
        },
        FeedItem::Lagged { skipped } => Some(
            SseEvent::default()
                .event(RESYNC_EVENT)
                .data(format!("{{\"skipped\":{skipped}}}")),
        ),
    }
}

pub async fn notification_stream(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Query(query): Query<TenantQuery>,
) -> AppResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    require_tenant(&auth_user, query.tenant_id)?;

    let mut subscription = state.feed.subscribe_tenant(query.tenant_id);
    let user_id = auth_user.id;

    tracing::info!(tenant_id = %query.tenant_id, user_id = %user_id, "change stream connected");

    let stream = async_stream::stream! {
        while let Some(item) = subscription.next().await {
            if let Some(event) = to_sse(item) {
                yield Ok(event);
            }
        }
        tracing::info!(tenant_id = %subscription.tenant_id(), user_id = %user_id, "change feed closed, ending stream");
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(state.config.sse_keepalive_secs))
            .text("heartbeat"),
    ))
}
