use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Routes are labelled by their template, never the raw URI, so ids in paths
/// do not explode label cardinality.
const UNMATCHED: &str = "unmatched";

/// Coarse grouping of a route template for dashboards.
pub fn route_family(template: &str) -> &'static str {
    let mut segments = template.trim_start_matches('/').split('/');
    match segments.next().unwrap_or_default() {
        "notifications" if template.ends_with("/stream") => "change_stream",
        "notifications" => "notifications",
        "push-tokens" => "push_tokens",
        "health" | "metrics" => "ops",
        _ => "other",
    }
}

/// Whether the request names a tenant explicitly in its query string.
fn tenant_scoped(req: &Request<Body>) -> bool {
    req.uri()
        .query()
        .is_some_and(|q| q.split('&').any(|pair| pair.starts_with("tenant_id=")))
}

pub async fn metrics_middleware(
    matched_path: Option<MatchedPath>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let route = matched_path
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED.to_string());
    let family = route_family(&route);
    let scoped = tenant_scoped(&req);

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    let labels = [
        ("method", method),
        ("route", route),
        ("family", family.to_string()),
        ("tenant_scoped", scoped.to_string()),
        ("status", status),
    ];

    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());

    response
}

/// Install the global Prometheus recorder. Fails if a recorder is already set.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    tracing::info!("prometheus recorder installed");
    Ok(handle)
}
