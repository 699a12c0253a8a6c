use chrono::{DateTime, Duration, Utc};
use seating_core::{
    AcquireOutcome, Clock, ConfirmOutcome, EventSink, HoldStore, ReleaseOutcome, SeatHold, SeatKey,
    SeatState, SeatingError, SeatingResult, SessionId,
};
use seating_shared::{SeatingEvent, Topic};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::session::SessionTracker;

#[derive(Debug, Clone)]
pub struct HoldConfig {
    pub hold_ttl: Duration,
    pub max_held_seats_per_session: usize,
    /// Lifetime of a session's hold set, longer than any hold in it
    pub session_ttl: Duration,
    /// Largest number of seats accepted in one batch request
    pub max_batch_size: usize,
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::seconds(900),
            max_held_seats_per_session: 10,
            session_ttl: Duration::seconds(1200),
            max_batch_size: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatFailure {
    pub seat_uid: String,
    pub reason: String,
}

impl SeatFailure {
    fn new(seat_uid: impl Into<String>, err: &SeatingError) -> Self {
        Self {
            seat_uid: seat_uid.into(),
            reason: err.reason(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchHoldResult {
    pub held: Vec<SeatHold>,
    pub failed: Vec<SeatFailure>,
    /// Earliest deadline among the held seats
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReleaseResult {
    pub released: Vec<String>,
    pub failed: Vec<SeatFailure>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchConfirmResult {
    pub confirmed: Vec<SeatHold>,
    pub failed: Vec<SeatFailure>,
}

/// What one viewer sees when looking at a seat.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SeatAvailability {
    Available,
    Held { expires_at: DateTime<Utc>, mine: bool },
    Sold,
    Blocked { reason: String },
}

/// Owns the seat hold lifecycle: `held -> confirmed` (terminal), or
/// `held -> released | expired`.
///
/// Every state change goes through one atomic store operation; the manager
/// only maps outcomes to errors and emits events.
pub struct HoldManager {
    store: Arc<dyn HoldStore>,
    sessions: SessionTracker,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    config: HoldConfig,
}

impl HoldManager {
    pub fn new(
        store: Arc<dyn HoldStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        config: HoldConfig,
    ) -> Self {
        let sessions = SessionTracker::new(
            store.clone(),
            clock.clone(),
            config.max_held_seats_per_session,
            config.session_ttl,
        );
        Self {
            store,
            sessions,
            clock,
            events,
            config,
        }
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn config(&self) -> &HoldConfig {
        &self.config
    }

    pub fn ttl_native(&self) -> bool {
        self.store.ttl_native()
    }

    pub async fn acquire_hold(&self, seat: &SeatKey, session: &SessionId) -> SeatingResult<SeatHold> {
        let (hold, fresh) = self.acquire_one(seat, session).await?;
        if fresh {
            self.publish(
                SeatingEvent::new(Topic::SeatsHeld, seat.event_seating_id, vec![seat.seat_uid.clone()], hold.acquired_at)
                    .with_session(session.as_str())
                    .with_expiry(hold.expires_at),
            )
            .await;
        }
        Ok(hold)
    }

    /// Holds several seats of one event. Failures are reported per seat;
    /// with `all_or_nothing` any failure releases the seats held so far.
    pub async fn acquire_holds(
        &self,
        event_seating_id: i64,
        seat_uids: &[String],
        session: &SessionId,
        all_or_nothing: bool,
    ) -> SeatingResult<BatchHoldResult> {
        let uids = self.batch(seat_uids)?;
        let mut result = BatchHoldResult::default();
        let mut fresh = Vec::new();

        for uid in uids {
            let seat = match SeatKey::parse(event_seating_id, &uid) {
                Ok(seat) => seat,
                Err(e) => {
                    result.failed.push(SeatFailure::new(uid, &e));
                    continue;
                }
            };
            match self.acquire_one(&seat, session).await {
                Ok((hold, is_fresh)) => {
                    if is_fresh {
                        fresh.push(hold.seat.clone());
                    }
                    result.held.push(hold);
                }
                Err(e @ SeatingError::Store(_)) => return Err(e),
                Err(e) => result.failed.push(SeatFailure::new(uid, &e)),
            }
        }

        if all_or_nothing && !result.failed.is_empty() {
            let now = self.clock.now();
            for seat in &fresh {
                if let Err(e) = self.store.release(seat, session, now).await {
                    warn!(seat = %seat, error = %e, "Rollback release failed, hold will expire");
                }
            }
            info!(session = %session, event_seating_id, failed = result.failed.len(), "Batch hold rolled back");
            result.held.clear();
            return Ok(result);
        }

        result.expires_at = result.held.iter().map(|h| h.expires_at).min();
        if let Some(expires_at) = result.expires_at.filter(|_| !fresh.is_empty()) {
            let uids = fresh.into_iter().map(|s| s.seat_uid).collect();
            self.publish(
                SeatingEvent::new(Topic::SeatsHeld, event_seating_id, uids, self.clock.now())
                    .with_session(session.as_str())
                    .with_expiry(expires_at),
            )
            .await;
        }
        Ok(result)
    }

    /// Releases a hold owned by `session`. Returns whether anything changed:
    /// absent, released, expired and confirmed holds are left as they are.
    pub async fn release_hold(&self, seat: &SeatKey, session: &SessionId) -> SeatingResult<bool> {
        let released = self.release_one(seat, session).await?;
        if released {
            self.publish(
                SeatingEvent::new(Topic::SeatsReleased, seat.event_seating_id, vec![seat.seat_uid.clone()], self.clock.now())
                    .with_session(session.as_str()),
            )
            .await;
        }
        Ok(released)
    }

    pub async fn release_holds(
        &self,
        event_seating_id: i64,
        seat_uids: &[String],
        session: &SessionId,
    ) -> SeatingResult<BatchReleaseResult> {
        let uids = self.batch(seat_uids)?;
        let mut result = BatchReleaseResult::default();

        for uid in uids {
            let seat = match SeatKey::parse(event_seating_id, &uid) {
                Ok(seat) => seat,
                Err(e) => {
                    result.failed.push(SeatFailure::new(uid, &e));
                    continue;
                }
            };
            match self.release_one(&seat, session).await {
                Ok(true) => result.released.push(seat.seat_uid),
                Ok(false) => {}
                Err(e @ SeatingError::Store(_)) => return Err(e),
                Err(e) => result.failed.push(SeatFailure::new(uid, &e)),
            }
        }

        if !result.released.is_empty() {
            self.publish(
                SeatingEvent::new(Topic::SeatsReleased, event_seating_id, result.released.clone(), self.clock.now())
                    .with_session(session.as_str()),
            )
            .await;
        }
        Ok(result)
    }

    pub async fn confirm_hold(&self, seat: &SeatKey, session: &SessionId) -> SeatingResult<SeatHold> {
        let (hold, fresh) = self.confirm_one(seat, session).await?;
        if fresh {
            self.publish(
                SeatingEvent::new(Topic::SeatsSold, seat.event_seating_id, vec![seat.seat_uid.clone()], self.clock.now())
                    .with_session(session.as_str()),
            )
            .await;
        }
        Ok(hold)
    }

    pub async fn confirm_holds(
        &self,
        event_seating_id: i64,
        seat_uids: &[String],
        session: &SessionId,
    ) -> SeatingResult<BatchConfirmResult> {
        let uids = self.batch(seat_uids)?;
        let mut result = BatchConfirmResult::default();
        let mut sold = Vec::new();

        for uid in uids {
            let seat = match SeatKey::parse(event_seating_id, &uid) {
                Ok(seat) => seat,
                Err(e) => {
                    result.failed.push(SeatFailure::new(uid, &e));
                    continue;
                }
            };
            match self.confirm_one(&seat, session).await {
                Ok((hold, fresh)) => {
                    if fresh {
                        sold.push(hold.seat.seat_uid.clone());
                    }
                    result.confirmed.push(hold);
                }
                Err(e @ SeatingError::Store(_)) => return Err(e),
                Err(e) => result.failed.push(SeatFailure::new(uid, &e)),
            }
        }

        if !sold.is_empty() {
            self.publish(
                SeatingEvent::new(Topic::SeatsSold, event_seating_id, sold, self.clock.now())
                    .with_session(session.as_str()),
            )
            .await;
        }
        Ok(result)
    }

    /// Expires holds past their deadline. A no-op on stores that expire
    /// records themselves.
    pub async fn sweep_expired(&self) -> SeatingResult<usize> {
        if self.store.ttl_native() {
            return Ok(0);
        }
        let now = self.clock.now();
        let expired = self.store.sweep(now).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut by_event: BTreeMap<i64, Vec<String>> = BTreeMap::new();
        for hold in &expired {
            by_event
                .entry(hold.seat.event_seating_id)
                .or_default()
                .push(hold.seat.seat_uid.clone());
        }
        for (event_seating_id, uids) in by_event {
            self.publish(SeatingEvent::new(Topic::SeatsExpired, event_seating_id, uids, now))
                .await;
        }

        info!(count = expired.len(), "Expired seat holds swept");
        Ok(expired.len())
    }

    pub async fn seat_status(&self, seat: &SeatKey, viewer: Option<&SessionId>) -> SeatingResult<SeatAvailability> {
        let state = self.store.seat_state(seat, self.clock.now()).await?;
        Ok(match state {
            SeatState::Free => SeatAvailability::Available,
            SeatState::Held(hold) => SeatAvailability::Held {
                expires_at: hold.expires_at,
                mine: viewer.is_some_and(|s| hold.is_owned_by(s)),
            },
            SeatState::Sold(_) => SeatAvailability::Sold,
            SeatState::Blocked { reason } => SeatAvailability::Blocked { reason },
        })
    }

    pub async fn session_holds(&self, session: &SessionId) -> SeatingResult<Vec<SeatHold>> {
        self.sessions.holds(session).await
    }

    /// Takes seats out of sale. Seats under a live hold are skipped.
    pub async fn block_seats(
        &self,
        event_seating_id: i64,
        seat_uids: &[String],
        reason: &str,
    ) -> SeatingResult<Vec<String>> {
        let seats = self.parse_all(event_seating_id, seat_uids)?;
        let blocked: Vec<String> = self
            .store
            .block(&seats, reason, self.clock.now())
            .await?
            .into_iter()
            .map(|s| s.seat_uid)
            .collect();

        if !blocked.is_empty() {
            info!(event_seating_id, count = blocked.len(), reason, "Seats blocked");
            self.publish(
                SeatingEvent::new(Topic::SeatsBlocked, event_seating_id, blocked.clone(), self.clock.now())
                    .with_reason(reason),
            )
            .await;
        }
        Ok(blocked)
    }

    pub async fn unblock_seats(&self, event_seating_id: i64, seat_uids: &[String]) -> SeatingResult<Vec<String>> {
        let seats = self.parse_all(event_seating_id, seat_uids)?;
        let unblocked: Vec<String> = self
            .store
            .unblock(&seats)
            .await?
            .into_iter()
            .map(|s| s.seat_uid)
            .collect();

        if !unblocked.is_empty() {
            info!(event_seating_id, count = unblocked.len(), "Seats unblocked");
            self.publish(SeatingEvent::new(
                Topic::SeatsUnblocked,
                event_seating_id,
                unblocked.clone(),
                self.clock.now(),
            ))
            .await;
        }
        Ok(unblocked)
    }

    pub async fn blocked_seats(&self, event_seating_id: i64) -> SeatingResult<Vec<(String, String)>> {
        Ok(self
            .store
            .blocked(event_seating_id)
            .await?
            .into_iter()
            .map(|(seat, reason)| (seat.seat_uid, reason))
            .collect())
    }

    async fn acquire_one(&self, seat: &SeatKey, session: &SessionId) -> SeatingResult<(SeatHold, bool)> {
        let now = self.clock.now();
        let hold = SeatHold::new(seat.clone(), session.clone(), now, self.config.hold_ttl);
        let outcome = self
            .store
            .acquire(&hold, self.config.max_held_seats_per_session, self.config.session_ttl, now)
            .await?;

        match outcome {
            AcquireOutcome::Acquired(hold) => {
                debug!(seat = %seat, session = %session, expires_at = %hold.expires_at, "Seat held");
                Ok((hold, true))
            }
            AcquireOutcome::AlreadyOwned(hold) => Ok((hold, false)),
            AcquireOutcome::Contended { owner } => {
                debug!(seat = %seat, session = %session, owner = %owner, "Seat already held");
                Err(SeatingError::AlreadyHeld { seat: seat.clone() })
            }
            AcquireOutcome::Sold => Err(SeatingError::SeatUnavailable {
                seat: seat.clone(),
                reason: "sold".into(),
            }),
            AcquireOutcome::Blocked { reason } => {
                debug!(seat = %seat, reason = %reason, "Seat blocked");
                Err(SeatingError::SeatUnavailable {
                    seat: seat.clone(),
                    reason: "blocked".into(),
                })
            }
            AcquireOutcome::SessionFull { count } => {
                debug!(session = %session, count, "Session hold limit reached");
                Err(SeatingError::SessionLimitExceeded {
                    session: session.to_string(),
                    limit: self.config.max_held_seats_per_session,
                })
            }
        }
    }

    async fn release_one(&self, seat: &SeatKey, session: &SessionId) -> SeatingResult<bool> {
        match self.store.release(seat, session, self.clock.now()).await? {
            ReleaseOutcome::Released(_) => {
                debug!(seat = %seat, session = %session, "Hold released");
                Ok(true)
            }
            ReleaseOutcome::NotFound | ReleaseOutcome::Confirmed => Ok(false),
            ReleaseOutcome::NotOwner { .. } => Err(SeatingError::NotOwner { seat: seat.clone() }),
        }
    }

    async fn confirm_one(&self, seat: &SeatKey, session: &SessionId) -> SeatingResult<(SeatHold, bool)> {
        match self.store.confirm(seat, session, self.clock.now()).await? {
            ConfirmOutcome::Confirmed(hold) => {
                info!(seat = %seat, session = %session, "Hold confirmed");
                Ok((hold, true))
            }
            ConfirmOutcome::AlreadyConfirmed(hold) => Ok((hold, false)),
            ConfirmOutcome::NotOwner { .. } => Err(SeatingError::NotOwner { seat: seat.clone() }),
            ConfirmOutcome::NotFound | ConfirmOutcome::Expired => {
                Err(SeatingError::HoldExpired { seat: seat.clone() })
            }
        }
    }

    /// Bounded client batch, trimmed and de-duplicated in request order.
    fn batch(&self, seat_uids: &[String]) -> SeatingResult<Vec<String>> {
        if seat_uids.len() > self.config.max_batch_size {
            return Err(SeatingError::Validation(format!(
                "at most {} seats per request",
                self.config.max_batch_size
            )));
        }
        dedupe(seat_uids)
    }

    fn parse_all(&self, event_seating_id: i64, seat_uids: &[String]) -> SeatingResult<Vec<SeatKey>> {
        dedupe(seat_uids)?
            .iter()
            .map(|uid| SeatKey::parse(event_seating_id, uid))
            .collect()
    }

    async fn publish(&self, event: SeatingEvent) {
        if let Err(e) = self.events.publish(&event).await {
            warn!(topic = %event.topic, event_seating_id = event.event_seating_id, error = %e, "Failed to publish seat event");
        }
    }
}

fn dedupe(seat_uids: &[String]) -> SeatingResult<Vec<String>> {
    if seat_uids.is_empty() {
        return Err(SeatingError::Validation("at least one seat uid is required".into()));
    }
    let mut seen = HashSet::new();
    Ok(seat_uids
        .iter()
        .map(|uid| uid.trim().to_string())
        .filter(|uid| seen.insert(uid.clone()))
        .collect())
}
