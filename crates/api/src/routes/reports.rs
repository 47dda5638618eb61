//! Operational reports.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use checkout::{CheckoutLock, CheckoutState};
use inventory::{StockReport, StockReservation};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Serialize)]
pub struct ActiveCheckout {
    pub checkout_id: String,
    pub cart_id: String,
    pub state: CheckoutState,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub version: i64,
}

impl From<CheckoutLock> for ActiveCheckout {
    fn from(lock: CheckoutLock) -> Self {
        Self {
            checkout_id: lock.id().to_string(),
            cart_id: lock.cart_id().to_string(),
            state: lock.state(),
            locked_at: lock.locked_at(),
            expires_at: lock.expires_at(),
            version: lock.version(),
        }
    }
}

/// GET /reports/active-checkouts — every unfinished checkout, oldest first.
#[tracing::instrument(skip(state))]
pub async fn active_checkouts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ActiveCheckout>>, ApiError> {
    let active = state.orchestrator.list_active().await?;
    Ok(Json(active.into_iter().map(ActiveCheckout::from).collect()))
}

/// GET /reports/expired-reservations — holds past expiry the sweeper has not
/// released yet.
#[tracing::instrument(skip(state, query))]
pub async fn expired_reservations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<StockReservation>>, ApiError> {
    let expired = state
        .reservations()
        .expired_unreleased(query.limit)
        .await?;
    Ok(Json(expired))
}

/// GET /reports/stock-alerts — low, out-of-stock, backorder and preorder levels.
#[tracing::instrument(skip(state))]
pub async fn stock_alerts(State(state): State<Arc<AppState>>) -> Result<Json<StockReport>, ApiError> {
    Ok(Json(StockReport::build(state.ledger()).await?))
}
