//! Inventory level endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{Money, Reference, VariantId, WarehouseId};
use inventory::{
    Adjustment, Catalog, Counter, Counters, InventoryKey, InventoryTransaction, LevelSettings,
    LevelSnapshot, TransactionKind,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct TrackLevelRequest {
    pub variant_id: String,
    pub warehouse_id: String,
    #[serde(default)]
    pub settings: LevelSettings,
    #[serde(default)]
    pub allows_backorder: bool,
    #[serde(default)]
    pub initial_quantity: i64,
}

#[derive(Deserialize)]
pub struct AdjustRequest {
    #[serde(default = "default_counter")]
    pub counter: Counter,
    pub delta: i64,
    pub kind: TransactionKind,
    pub actor: Option<String>,
    pub note: Option<String>,
}

fn default_counter() -> Counter {
    Counter::OnHand
}

#[derive(Deserialize)]
pub struct SetPriceRequest {
    pub unit_price_cents: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct AdjustResponse {
    pub before: Counters,
    pub after: Counters,
}

// -- Handlers --

/// POST /inventory/levels — start tracking a (variant, warehouse) pairing.
///
/// The warehouse is appended to the variant's allocation priority.
#[tracing::instrument(skip(state, req), fields(variant = %req.variant_id, warehouse = %req.warehouse_id))]
pub async fn track(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TrackLevelRequest>,
) -> Result<(StatusCode, Json<LevelSnapshot>), ApiError> {
    if req.initial_quantity < 0 {
        return Err(ApiError::BadRequest(
            "initial_quantity must not be negative".to_string(),
        ));
    }
    let variant_id = VariantId::new(req.variant_id);
    let warehouse_id = WarehouseId::new(req.warehouse_id);

    let mut priority = state.catalog.warehouse_priority(&variant_id).await?;
    if !priority.contains(&warehouse_id) {
        priority.push(warehouse_id.clone());
    }
    state
        .catalog
        .set_warehouse_priority(variant_id.clone(), priority);
    state
        .catalog
        .set_allows_backorder(variant_id.clone(), req.allows_backorder);

    let ledger = state.ledger();
    ledger
        .track(
            InventoryKey::new(variant_id.clone(), warehouse_id.clone()),
            req.settings,
        )
        .await?;
    if req.initial_quantity > 0 {
        ledger
            .adjust(
                &variant_id,
                &warehouse_id,
                req.initial_quantity,
                TransactionKind::Receipt,
                Some(Reference::manual("api")),
            )
            .await?;
    }

    let snapshot = ledger.get(&variant_id, &warehouse_id).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /inventory/{variant}/{warehouse} — counters and derived status.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path((variant, warehouse)): Path<(String, String)>,
) -> Result<Json<LevelSnapshot>, ApiError> {
    let snapshot = state
        .ledger()
        .get(&VariantId::new(variant), &WarehouseId::new(warehouse))
        .await?;
    Ok(Json(snapshot))
}

/// POST /inventory/{variant}/{warehouse}/adjust — audited counter change.
#[tracing::instrument(skip(state, req))]
pub async fn adjust(
    State(state): State<Arc<AppState>>,
    Path((variant, warehouse)): Path<(String, String)>,
    Json(req): Json<AdjustRequest>,
) -> Result<Json<AdjustResponse>, ApiError> {
    let actor = req.actor.unwrap_or_else(|| "api".to_string());
    let mut adjustment = Adjustment::counter(
        InventoryKey::new(variant, warehouse),
        req.counter,
        req.delta,
        req.kind,
    )
    .by(actor.clone())
    .referencing(Reference::manual(actor));
    if let Some(note) = req.note {
        adjustment = adjustment.with_note(note);
    }

    let (before, after) = state.ledger().adjust_counter(adjustment).await?;
    Ok(Json(AdjustResponse { before, after }))
}

/// GET /inventory/{variant}/{warehouse}/transactions — audit trail, oldest first.
#[tracing::instrument(skip(state))]
pub async fn transactions(
    State(state): State<Arc<AppState>>,
    Path((variant, warehouse)): Path<(String, String)>,
) -> Result<Json<Vec<InventoryTransaction>>, ApiError> {
    let variant_id = VariantId::new(variant);
    let warehouse_id = WarehouseId::new(warehouse);
    // 404 for untracked pairings rather than an empty list
    state.ledger().level(&InventoryKey::new(variant_id.clone(), warehouse_id.clone())).await?;
    let transactions = state
        .ledger()
        .transactions(&variant_id, &warehouse_id)
        .await?;
    Ok(Json(transactions))
}

/// POST /prices/{variant} — set the unit price served to price snapshots.
#[tracing::instrument(skip(state, req))]
pub async fn set_price(
    State(state): State<Arc<AppState>>,
    Path(variant): Path<String>,
    Json(req): Json<SetPriceRequest>,
) -> Result<StatusCode, ApiError> {
    if req.unit_price_cents < 0 {
        return Err(ApiError::BadRequest(
            "unit_price_cents must not be negative".to_string(),
        ));
    }
    state
        .prices
        .set_price(variant, Money::from_cents(req.unit_price_cents));
    Ok(StatusCode::NO_CONTENT)
}
