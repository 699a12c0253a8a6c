use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use seating_core::SeatingError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Seating(#[from] SeatingError),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Seating(e) => e.code(),
            AppError::RateLimited => "rate_limited",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Anyhow(_) => "internal_error",
        }
    }
}

/// Status for a seating error code or batch failure reason.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "already_held" | "seat_unavailable" | "blocked" | "sold" | "concurrency_conflict" => {
            StatusCode::CONFLICT
        }
        "session_limit_exceeded" => StatusCode::UNPROCESSABLE_ENTITY,
        "not_owner" => StatusCode::FORBIDDEN,
        "hold_expired" => StatusCode::GONE,
        "pricing_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        "validation_error" => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, error_message) = match &self {
            AppError::Seating(e @ (SeatingError::Store(_) | SeatingError::Event(_))) => {
                tracing::error!("Internal Server Error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
            AppError::Seating(e) => (status_for_code(code), e.to_string()),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seating_core::SeatKey;

    #[test]
    fn test_seating_errors_map_to_statuses() {
        let seat = SeatKey::new(1, "A1");
        let cases = [
            (SeatingError::AlreadyHeld { seat: seat.clone() }, StatusCode::CONFLICT),
            (
                SeatingError::SessionLimitExceeded { session: "s".into(), limit: 10 },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (SeatingError::NotOwner { seat: seat.clone() }, StatusCode::FORBIDDEN),
            (SeatingError::HoldExpired { seat: seat.clone() }, StatusCode::GONE),
            (SeatingError::PricingUnavailable { seat: seat.clone() }, StatusCode::SERVICE_UNAVAILABLE),
            (SeatingError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (SeatingError::Store("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
        assert_eq!(status_for_code("sold"), StatusCode::CONFLICT);
        assert_eq!(AppError::RateLimited.into_response().status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
