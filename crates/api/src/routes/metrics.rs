//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::AppState;

#[derive(Clone)]
pub struct MetricsState {
    pub handle: PrometheusHandle,
    pub app: Arc<AppState>,
}

/// GET /metrics — Prometheus text format. Refreshes the active-checkout gauge
/// before rendering.
pub async fn get(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.app.orchestrator.list_active().await {
        Ok(active) => metrics::gauge!("checkout_active_locks").set(active.len() as f64),
        Err(e) => tracing::warn!(error = %e, "could not count active checkouts"),
    }
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.handle.render(),
    )
}
