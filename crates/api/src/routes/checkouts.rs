//! Checkout endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use checkout::{CheckoutLock, SessionIdentity, UserOutcome};
use common::{Cart, CheckoutId};
use pricing::FrozenPrices;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateCheckoutRequest {
    pub cart: Cart,
    pub session_id: String,
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    #[serde(default = "default_cancel_reason")]
    pub reason: String,
}

fn default_cancel_reason() -> String {
    "cancelled by shopper".to_string()
}

// -- Response types --

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub checkout: CheckoutLock,
    /// Present once the checkout has finished.
    pub outcome: Option<UserOutcome>,
    pub prices: Option<FrozenPrices>,
}

impl CheckoutResponse {
    async fn load(state: &AppState, checkout: CheckoutLock) -> Result<Self, ApiError> {
        let prices = state
            .orchestrator
            .prices()
            .for_checkout(checkout.id())
            .await?;
        Ok(Self {
            outcome: checkout.user_outcome(),
            checkout,
            prices,
        })
    }
}

// -- Handlers --

/// POST /checkouts — start (or resume) the cart's checkout and run it to the end.
///
/// Business failures (no stock, declined payment) are a `200` with a failed
/// checkout and its outcome, not an error status.
#[tracing::instrument(skip(state, req), fields(cart_id = %req.cart.id))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let session = match req.user_id {
        Some(user_id) => SessionIdentity::user(req.session_id, user_id),
        None => SessionIdentity::anonymous(req.session_id),
    };
    let result = state.orchestrator.checkout(&req.cart, session).await?;
    Ok(Json(CheckoutResponse::load(&state, result.lock).await?))
}

/// GET /checkouts/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let id = parse_checkout_id(&id)?;
    let checkout = state
        .orchestrator
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Checkout {id} not found")))?;
    Ok(Json(CheckoutResponse::load(&state, checkout).await?))
}

/// POST /checkouts/{id}/cancel — abandon a running checkout and release its stock.
#[tracing::instrument(skip(state, req))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let id = parse_checkout_id(&id)?;
    let checkout = state.orchestrator.cancel(id, &req.reason).await?;
    Ok(Json(CheckoutResponse::load(&state, checkout).await?))
}

fn parse_checkout_id(id: &str) -> Result<CheckoutId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid checkout id: {e}")))
}
