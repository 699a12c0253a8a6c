use crate::model::SeatKey;

#[derive(Debug, thiserror::Error)]
pub enum SeatingError {
    #[error("Seat already held: {seat}")]
    AlreadyHeld { seat: SeatKey },

    #[error("Session {session} already holds the maximum of {limit} seats")]
    SessionLimitExceeded { session: String, limit: usize },

    #[error("Hold on {seat} belongs to another session")]
    NotOwner { seat: SeatKey },

    #[error("Hold on {seat} has expired")]
    HoldExpired { seat: SeatKey },

    #[error("Seat unavailable: {seat} ({reason})")]
    SeatUnavailable { seat: SeatKey, reason: String },

    #[error("No price available for {seat}")]
    PricingUnavailable { seat: SeatKey },

    #[error("Concurrent update on {seat} still conflicting after {attempts} attempts")]
    ConcurrencyConflict { seat: SeatKey, attempts: u32 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Hold store error: {0}")]
    Store(String),

    #[error("Event publishing failed: {0}")]
    Event(String),
}

impl SeatingError {
    /// Stable machine-readable code, returned to clients next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            SeatingError::AlreadyHeld { .. } => "already_held",
            SeatingError::SessionLimitExceeded { .. } => "session_limit_exceeded",
            SeatingError::NotOwner { .. } => "not_owner",
            SeatingError::HoldExpired { .. } => "hold_expired",
            SeatingError::SeatUnavailable { .. } => "seat_unavailable",
            SeatingError::PricingUnavailable { .. } => "pricing_unavailable",
            SeatingError::ConcurrencyConflict { .. } => "concurrency_conflict",
            SeatingError::Validation(_) => "validation_error",
            SeatingError::Store(_) => "store_error",
            SeatingError::Event(_) => "event_error",
        }
    }

    /// Short reason used in batch responses (`failed[].reason`).
    pub fn reason(&self) -> String {
        match self {
            SeatingError::SeatUnavailable { reason, .. } => reason.clone(),
            other => other.code().to_string(),
        }
    }
}

pub type SeatingResult<T> = Result<T, SeatingError>;
