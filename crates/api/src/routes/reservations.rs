//! Stock reservation endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{Reference, ReservationId, VariantId};
use inventory::{PartialPolicy, ReserveRequest, StockReservation};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateReservationRequest {
    pub variant_id: String,
    /// Omit to spread the quantity over the variant's warehouses.
    pub warehouse_id: Option<String>,
    pub quantity: i64,
    /// Defaults to a manual reservation by `"api"`.
    pub owner: Option<Reference>,
    pub ttl_secs: Option<u64>,
    pub partial_policy: Option<PartialPolicy>,
}

#[derive(Deserialize)]
pub struct ExtendRequest {
    pub ttl_secs: u64,
}

// -- Response types --

#[derive(Serialize)]
pub struct ReservationsResponse {
    pub requested: i64,
    pub reserved: i64,
    pub partial: bool,
    pub reservations: Vec<StockReservation>,
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub reservation_id: String,
    pub released_quantity: i64,
}

// -- Handlers --

/// POST /reservations — hold stock for a checkout, an order or an operator.
#[tracing::instrument(skip(state, req), fields(variant = %req.variant_id, quantity = req.quantity))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ReservationsResponse>), ApiError> {
    let owner = req.owner.unwrap_or_else(|| Reference::manual("api"));
    let manual = matches!(owner, Reference::Manual { .. });
    let ttl = req.ttl_secs.map(Duration::from_secs);
    let reservations = state.reservations();

    let held = match req.warehouse_id {
        Some(warehouse_id) => {
            let mut request = ReserveRequest::new(req.variant_id, warehouse_id, req.quantity, owner);
            request.ttl = ttl;
            request.partial_policy = req.partial_policy;
            if manual {
                request = request.manual();
            }
            vec![reservations.reserve(request).await?.into_reservation()]
        }
        None => {
            reservations
                .allocate(&VariantId::new(req.variant_id), req.quantity, owner, ttl)
                .await?
                .reservations
        }
    };

    let reserved = held.iter().map(StockReservation::reserved_quantity).sum();
    Ok((
        StatusCode::CREATED,
        Json(ReservationsResponse {
            requested: req.quantity,
            reserved,
            partial: reserved < req.quantity,
            reservations: held,
        }),
    ))
}

/// GET /reservations/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StockReservation>, ApiError> {
    let id = parse_reservation_id(&id)?;
    let reservation = state
        .reservations()
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Reservation {id} not found")))?;
    Ok(Json(reservation))
}

/// POST /reservations/{id}/release — return the held stock.
#[tracing::instrument(skip(state))]
pub async fn release(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let id = parse_reservation_id(&id)?;
    let released_quantity = state.reservations().release(id).await?;
    Ok(Json(ReleaseResponse {
        reservation_id: id.to_string(),
        released_quantity,
    }))
}

/// POST /reservations/{id}/confirm — make the hold permanent.
#[tracing::instrument(skip(state))]
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StockReservation>, ApiError> {
    let id = parse_reservation_id(&id)?;
    Ok(Json(state.reservations().confirm(id).await?))
}

/// POST /reservations/{id}/extend — push the expiry out from now.
#[tracing::instrument(skip(state, req))]
pub async fn extend(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ExtendRequest>,
) -> Result<Json<StockReservation>, ApiError> {
    let id = parse_reservation_id(&id)?;
    let reservation = state
        .reservations()
        .extend(id, Duration::from_secs(req.ttl_secs))
        .await?;
    Ok(Json(reservation))
}

fn parse_reservation_id(id: &str) -> Result<ReservationId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid reservation id: {e}")))
}
