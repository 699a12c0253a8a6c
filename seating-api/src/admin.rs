use axum::{
    extract::{Path, State},
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use seating_core::{PriceQuote, SeatKey};
use seating_pricing::EventPricingProfile;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::error::AppError;
use crate::middleware::admin_auth_middleware;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub seat_uids: Vec<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnblockRequest {
    pub seat_uids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BlockedSeat {
    pub seat_uid: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub price_cents: i64,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/admin/events/{event_seating_id}/seats/block", post(block_seats))
        .route("/v1/admin/events/{event_seating_id}/seats/unblock", post(unblock_seats))
        .route("/v1/admin/events/{event_seating_id}/seats/blocked", get(list_blocked))
        .route(
            "/v1/admin/events/{event_seating_id}/pricing",
            get(get_pricing_profile).put(put_pricing_profile),
        )
        .route(
            "/v1/admin/events/{event_seating_id}/pricing/recompute",
            post(recompute_event),
        )
        .route(
            "/v1/admin/events/{event_seating_id}/seats/{seat_uid}/price-override",
            post(override_price),
        )
        .route_layer(from_fn_with_state(state, admin_auth_middleware))
}

// ============================================================================
// Seat blocking
// ============================================================================

async fn block_seats(
    State(state): State<AppState>,
    Path(event_seating_id): Path<i64>,
    Json(req): Json<BlockRequest>,
) -> Result<Json<Value>, AppError> {
    let reason = req.reason.as_deref().unwrap_or("admin");
    let blocked = state
        .holds
        .block_seats(event_seating_id, &req.seat_uids, reason)
        .await?;
    Ok(Json(json!({ "blocked": blocked })))
}

async fn unblock_seats(
    State(state): State<AppState>,
    Path(event_seating_id): Path<i64>,
    Json(req): Json<UnblockRequest>,
) -> Result<Json<Value>, AppError> {
    let unblocked = state.holds.unblock_seats(event_seating_id, &req.seat_uids).await?;
    Ok(Json(json!({ "unblocked": unblocked })))
}

async fn list_blocked(
    State(state): State<AppState>,
    Path(event_seating_id): Path<i64>,
) -> Result<Json<Vec<BlockedSeat>>, AppError> {
    let seats = state
        .holds
        .blocked_seats(event_seating_id)
        .await?
        .into_iter()
        .map(|(seat_uid, reason)| BlockedSeat { seat_uid, reason })
        .collect();
    Ok(Json(seats))
}

// ============================================================================
// Pricing
// ============================================================================

async fn put_pricing_profile(
    State(state): State<AppState>,
    Path(event_seating_id): Path<i64>,
    Json(profile): Json<EventPricingProfile>,
) -> Result<Json<EventPricingProfile>, AppError> {
    state
        .pricing
        .register_profile(event_seating_id, profile.clone())
        .await?;
    info!(event_seating_id, base_price_cents = profile.base_price_cents, "Pricing profile registered");
    Ok(Json(profile))
}

async fn get_pricing_profile(
    State(state): State<AppState>,
    Path(event_seating_id): Path<i64>,
) -> Result<Json<EventPricingProfile>, AppError> {
    state
        .pricing
        .profiles()
        .get(event_seating_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No pricing profile for event {}", event_seating_id)))
}

async fn override_price(
    State(state): State<AppState>,
    Path((event_seating_id, seat_uid)): Path<(i64, String)>,
    Json(req): Json<OverrideRequest>,
) -> Result<Json<PriceQuote>, AppError> {
    let seat = SeatKey::parse(event_seating_id, &seat_uid)?;
    let quote = state.pricing.override_price(&seat, req.price_cents).await?;
    info!(seat = %seat, price_cents = quote.price_cents, "Price override applied");
    Ok(Json(quote))
}

async fn recompute_event(
    State(state): State<AppState>,
    Path(event_seating_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let priced = state.pricing.recompute_event(event_seating_id).await?;
    Ok(Json(json!({ "priced": priced })))
}
