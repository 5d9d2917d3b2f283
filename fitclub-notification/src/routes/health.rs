use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use fitclub_shared::types::{HealthCheck, HealthResponse, HealthStatus};

use crate::AppState;

/// Health check covering the store and the broker connection.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let store = match state.notifications.ping().await {
        Ok(()) => HealthCheck::new("store", HealthStatus::Healthy),
        Err(e) => HealthCheck::new("store", HealthStatus::Unhealthy).with_message(e.to_string()),
    };

    let broker = match (&state.rabbitmq, state.config.broker_enabled) {
        (Some(_), _) => HealthCheck::new("broker", HealthStatus::Healthy),
        (None, false) => HealthCheck::new("broker", HealthStatus::Healthy).with_message("disabled"),
        (None, true) => HealthCheck::new("broker", HealthStatus::Degraded).with_message("not connected"),
    };

    let feed = HealthCheck::new("feed", HealthStatus::Healthy)
        .with_message(format!("{} subscribers", state.feed.receiver_count()));

    let response = HealthResponse::healthy("fitclub-notification", env!("CARGO_PKG_VERSION"))
        .with_checks(vec![store, broker, feed]);

    let status = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(response)).into_response()
}

/// Returns Prometheus metrics.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_is_public_and_healthy() {
        let app = crate::router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = crate::test_support::json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "fitclub-notification");
    }
}
