//! Redis key builders. Every key the service writes is built here.

use seating_core::{SeatKey, SessionId};

/// Hash holding one seat's hold record.
pub fn seat(prefix: &str, seat: &SeatKey) -> String {
    format!("{prefix}:seat:{}:{}", seat.event_seating_id, seat.seat_uid)
}

/// Set of seat keys (`{event}:{uid}`) currently held by a session.
pub fn session(prefix: &str, session: &SessionId) -> String {
    format!("{prefix}:session:{session}")
}

/// Hash of blocked seat uids to block reason, per event.
pub fn blocked(prefix: &str, event_seating_id: i64) -> String {
    format!("{prefix}:blocked:{event_seating_id}")
}

/// Fixed-window rate limit counter.
pub fn rate_limit(prefix: &str, operation: &str, identifier: &str) -> String {
    format!("{prefix}:ratelimit:{operation}:{identifier}")
}
