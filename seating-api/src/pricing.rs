use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use seating_core::{PriceQuote, SeatKey};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/v1/events/{event_seating_id}/seats/{seat_uid}/price",
        get(seat_price),
    )
}

async fn seat_price(
    State(state): State<AppState>,
    Path((event_seating_id, seat_uid)): Path<(i64, String)>,
) -> Result<Json<PriceQuote>, AppError> {
    let seat = SeatKey::parse(event_seating_id, &seat_uid)?;
    let quote = state.pricing.quote(&seat).await?;
    Ok(Json(quote))
}
