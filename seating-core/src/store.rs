use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::SeatingResult;
use crate::model::{SeatHold, SeatKey, SessionId};

/// Result of an atomic acquire attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    /// The hold was written and added to the session set.
    Acquired(SeatHold),
    /// The session already holds this seat; nothing changed.
    AlreadyOwned(SeatHold),
    /// Another session holds a live hold on the seat.
    Contended { owner: SessionId },
    /// The seat was already confirmed (sold).
    Sold,
    /// The session set is at the per-session cap.
    SessionFull { count: usize },
    /// The seat is administratively blocked.
    Blocked { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    Released(SeatHold),
    /// No live hold exists (never held, already released or expired).
    NotFound,
    NotOwner { owner: SessionId },
    /// Confirmed holds are terminal and stay in place.
    Confirmed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    Confirmed(SeatHold),
    AlreadyConfirmed(SeatHold),
    NotFound,
    NotOwner { owner: SessionId },
    Expired,
}

/// Point-in-time view of a seat.
#[derive(Debug, Clone, PartialEq)]
pub enum SeatState {
    Free,
    Held(SeatHold),
    Sold(SeatHold),
    Blocked { reason: String },
}

/// Shared key-value store holding seat holds and per-session hold sets.
///
/// Every mutating operation must be atomic per seat and per session set:
/// the uniqueness and per-session cap invariants cannot be met with
/// read-then-write sequences issued by the caller.
#[async_trait]
pub trait HoldStore: Send + Sync {
    async fn acquire(
        &self,
        hold: &SeatHold,
        max_per_session: usize,
        session_ttl: Duration,
        now: DateTime<Utc>,
    ) -> SeatingResult<AcquireOutcome>;

    async fn get(&self, seat: &SeatKey) -> SeatingResult<Option<SeatHold>>;

    async fn seat_state(&self, seat: &SeatKey, now: DateTime<Utc>) -> SeatingResult<SeatState>;

    async fn release(
        &self,
        seat: &SeatKey,
        session: &SessionId,
        now: DateTime<Utc>,
    ) -> SeatingResult<ReleaseOutcome>;

    async fn confirm(
        &self,
        seat: &SeatKey,
        session: &SessionId,
        now: DateTime<Utc>,
    ) -> SeatingResult<ConfirmOutcome>;

    /// Live, unconfirmed holds of a session.
    async fn session_seats(&self, session: &SessionId, now: DateTime<Utc>) -> SeatingResult<Vec<SeatHold>>;

    async fn session_count(&self, session: &SessionId, now: DateTime<Utc>) -> SeatingResult<usize>;

    /// Creates the session set if missing and refreshes its lifetime.
    async fn touch_session(&self, session: &SessionId, ttl: Duration, now: DateTime<Utc>) -> SeatingResult<()>;

    /// Blocks seats that have no live hold. Returns the seats actually blocked.
    async fn block(&self, seats: &[SeatKey], reason: &str, now: DateTime<Utc>) -> SeatingResult<Vec<SeatKey>>;

    async fn unblock(&self, seats: &[SeatKey]) -> SeatingResult<Vec<SeatKey>>;

    async fn blocked(&self, event_seating_id: i64) -> SeatingResult<Vec<(SeatKey, String)>>;

    /// Expires holds past their deadline and frees the seats.
    async fn sweep(&self, now: DateTime<Utc>) -> SeatingResult<Vec<SeatHold>>;

    /// True when the backend expires records on its own.
    fn ttl_native(&self) -> bool;
}

/// Fixed-window request counter backing the per-operation rate limits.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Counts one hit and returns whether the caller is still within `limit`.
    async fn hit(&self, key: &str, limit: u32, window: std::time::Duration) -> SeatingResult<bool>;
}
