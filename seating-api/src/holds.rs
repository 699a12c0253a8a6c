use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use seating_core::{SeatHold, SeatKey};
use seating_hold::{
    BatchConfirmResult, BatchHoldResult, BatchReleaseResult, SeatAvailability, SeatFailure,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{status_for_code, AppError};
use crate::session::ClientSession;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HoldRequest {
    pub event_seating_id: i64,
    pub seat_uids: Vec<String>,
    #[serde(default)]
    pub all_or_nothing: bool,
}

#[derive(Debug, Deserialize)]
pub struct SeatsRequest {
    pub event_seating_id: i64,
    pub seat_uids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionHoldsResponse {
    pub session_id: String,
    pub count: usize,
    pub limit: usize,
    pub holds: Vec<SeatHold>,
}

#[derive(Debug, Serialize)]
pub struct SeatStatusResponse {
    pub seat: SeatKey,
    #[serde(flatten)]
    pub availability: SeatAvailability,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/seats/hold", post(hold_seats).delete(release_seats))
        .route("/v1/seats/confirm", post(confirm_seats))
        .route("/v1/seats/holds", get(session_holds))
        .route("/v1/events/{event_seating_id}/seats/{seat_uid}", get(seat_status))
}

/// 200 when anything succeeded; otherwise the status of the first failure.
fn batch_status(succeeded: usize, failed: &[SeatFailure]) -> StatusCode {
    match failed.first() {
        Some(failure) if succeeded == 0 => status_for_code(&failure.reason),
        _ => StatusCode::OK,
    }
}

async fn hold_seats(
    State(state): State<AppState>,
    Extension(session): Extension<ClientSession>,
    Json(req): Json<HoldRequest>,
) -> Result<(StatusCode, Json<BatchHoldResult>), AppError> {
    let result = state
        .holds
        .acquire_holds(req.event_seating_id, &req.seat_uids, &session.id, req.all_or_nothing)
        .await?;

    info!(
        session = %session.id,
        event_seating_id = req.event_seating_id,
        held = result.held.len(),
        failed = result.failed.len(),
        "Hold request processed"
    );
    Ok((batch_status(result.held.len(), &result.failed), Json(result)))
}

async fn release_seats(
    State(state): State<AppState>,
    Extension(session): Extension<ClientSession>,
    Json(req): Json<SeatsRequest>,
) -> Result<(StatusCode, Json<BatchReleaseResult>), AppError> {
    let result = state
        .holds
        .release_holds(req.event_seating_id, &req.seat_uids, &session.id)
        .await?;

    // Releasing nothing is still a success; only ownership failures count.
    let status = if result.released.is_empty() {
        batch_status(0, &result.failed)
    } else {
        StatusCode::OK
    };
    Ok((status, Json(result)))
}

async fn confirm_seats(
    State(state): State<AppState>,
    Extension(session): Extension<ClientSession>,
    Json(req): Json<SeatsRequest>,
) -> Result<(StatusCode, Json<BatchConfirmResult>), AppError> {
    let result = state
        .holds
        .confirm_holds(req.event_seating_id, &req.seat_uids, &session.id)
        .await?;

    info!(
        session = %session.id,
        event_seating_id = req.event_seating_id,
        confirmed = result.confirmed.len(),
        failed = result.failed.len(),
        "Confirm request processed"
    );
    Ok((batch_status(result.confirmed.len(), &result.failed), Json(result)))
}

async fn session_holds(
    State(state): State<AppState>,
    Extension(session): Extension<ClientSession>,
) -> Result<Json<SessionHoldsResponse>, AppError> {
    let holds = state.holds.session_holds(&session.id).await?;
    Ok(Json(SessionHoldsResponse {
        session_id: session.id.to_string(),
        count: holds.len(),
        limit: state.holds.sessions().limit(),
        holds,
    }))
}

async fn seat_status(
    State(state): State<AppState>,
    Extension(session): Extension<ClientSession>,
    Path((event_seating_id, seat_uid)): Path<(i64, String)>,
) -> Result<Json<SeatStatusResponse>, AppError> {
    let seat = SeatKey::parse(event_seating_id, &seat_uid)?;
    let viewer = (!session.minted).then_some(&session.id);
    let availability = state.holds.seat_status(&seat, viewer).await?;
    Ok(Json(SeatStatusResponse { seat, availability }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_status() {
        let failure = |reason: &str| SeatFailure {
            seat_uid: "A1".into(),
            reason: reason.into(),
        };
        assert_eq!(batch_status(0, &[failure("already_held")]), StatusCode::CONFLICT);
        assert_eq!(batch_status(0, &[failure("session_limit_exceeded")]), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(batch_status(2, &[failure("already_held")]), StatusCode::OK);
        assert_eq!(batch_status(0, &[]), StatusCode::OK);
    }
}
