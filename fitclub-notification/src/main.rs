use std::future::Future;
use std::sync::Arc;

use fitclub_notification::config::{AppConfig, StoreBackend};
use fitclub_notification::store::{MemoryStore, PgStore};
use fitclub_notification::{events, router, AppState};
use fitclub_shared::clients::db::create_pool;
use fitclub_shared::clients::rabbitmq::RabbitMQClient;

fn spawn_listener<F, Fut>(name: &'static str, state: &Arc<AppState>, listener: F)
where
    F: FnOnce(Arc<AppState>) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let task = listener(state.clone());
    tokio::spawn(async move {
        if let Err(e) = task.await {
            tracing::error!(error = %e, listener = name, "event listener failed");
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fitclub_shared::middleware::init_tracing("fitclub-notification");

    let config = AppConfig::load()?;
    let port = config.port;

    // Set JWT_SECRET env var for the auth extractor middleware
    std::env::set_var("JWT_SECRET", &config.jwt_secret);

    let mut state = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = create_pool(&config.database_url, config.db_pool_size)?;
            AppState::new(config.clone(), Arc::new(PgStore::new(pool)))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store, data will not survive a restart");
            AppState::new(config.clone(), Arc::new(MemoryStore::new()))
        }
    };

    match fitclub_shared::middleware::init_metrics() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics recorder not installed"),
    }

    if config.broker_enabled {
        match RabbitMQClient::connect(&config.rabbitmq_url).await {
            Ok(rabbitmq) => state = state.with_rabbitmq(rabbitmq),
            Err(e) => tracing::error!(error = %e, "broker unavailable, running without cross-instance events"),
        }
    }

    let state = Arc::new(state);

    if state.rabbitmq.is_some() {
        spawn_listener("tenant", &state, events::subscriber::listen_tenant_events);
        spawn_listener("account", &state, events::subscriber::listen_account_events);
        spawn_listener("broadcast", &state, events::subscriber::listen_broadcast_requests);
        spawn_listener("peer-changes", &state, events::subscriber::listen_peer_changes);
        spawn_listener("forwarder", &state, events::publisher::forward_changes);
    }

    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "fitclub-notification starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
