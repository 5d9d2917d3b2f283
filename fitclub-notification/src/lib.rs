use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use fitclub_shared::clients::rabbitmq::RabbitMQClient;
use fitclub_shared::middleware::metrics_middleware;

pub mod config;
pub mod events;
pub mod feed;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;
pub mod store;

use config::AppConfig;
use feed::ChangeFeed;
use services::{NotificationService, PushTokenRegistry};
use store::{MemoryStore, NotificationStore, PushTokenStore};

pub struct AppState {
    pub config: AppConfig,
    pub notifications: NotificationService,
    pub push_tokens: PushTokenRegistry,
    pub feed: ChangeFeed,
    pub rabbitmq: Option<RabbitMQClient>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new<S>(config: AppConfig, store: Arc<S>) -> Self
    where
        S: NotificationStore + PushTokenStore + 'static,
    {
        let feed = ChangeFeed::new(config.feed_capacity);
        Self {
            notifications: NotificationService::new(store.clone(), feed.clone()),
            push_tokens: PushTokenRegistry::new(store),
            feed,
            config,
            rabbitmq: None,
            metrics_handle: None,
        }
    }

    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    pub fn with_rabbitmq(mut self, rabbitmq: RabbitMQClient) -> Self {
        self.rabbitmq = Some(rabbitmq);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        .route(
            "/notifications",
            get(routes::notifications::list_notifications)
                .post(routes::notifications::create_notification)
                .delete(routes::notifications::delete_all),
        )
        .route("/notifications/unread-count", get(routes::notifications::unread_count))
        .route("/notifications/mark-all-read", post(routes::notifications::mark_all_read))
        .route("/notifications/stream", get(routes::stream::notification_stream))
        .route("/notifications/:id", delete(routes::notifications::delete_notification))
        .route("/notifications/:id/read", post(routes::notifications::mark_read))
        .route(
            "/push-tokens",
            get(routes::push_tokens::list_tokens)
                .post(routes::push_tokens::register_token)
                .delete(routes::push_tokens::remove_token),
        )
        .route("/push-tokens/check", get(routes::push_tokens::check_token))
        .route("/push-tokens/all", delete(routes::push_tokens::remove_all_tokens))
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use fitclub_shared::types::{Claims, UserRole};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    pub fn test_state() -> Arc<AppState> {
        Arc::new(AppState::in_memory(AppConfig::in_memory()))
    }

    pub fn bearer(user_id: Uuid, role: UserRole, tenants: Vec<Uuid>) -> String {
        let claims = Claims::new(user_id, role, tenants, 3600);
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(fitclub_shared::middleware::DEFAULT_JWT_SECRET.as_bytes()),
        )
        .unwrap();
        format!("Bearer {token}")
    }

    pub fn request(method: &str, uri: &str, auth: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, auth);
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    pub async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
