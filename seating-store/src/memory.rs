//! In-process hold store and rate limiter.
//!
//! A single mutex guards seats, session sets and blocks together, which makes
//! every operation a linearizable check-and-set. Holds are not expired by the
//! store itself; the sweep job transitions them.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use seating_core::{
    AcquireOutcome, ConfirmOutcome, HoldStatus, HoldStore, RateLimitStore, ReleaseOutcome, SeatHold,
    SeatKey, SeatState, SeatingResult, SessionId,
};

#[derive(Debug)]
struct SessionEntry {
    seats: BTreeSet<SeatKey>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    holds: HashMap<SeatKey, SeatHold>,
    sessions: HashMap<SessionId, SessionEntry>,
    blocked: HashMap<SeatKey, String>,
}

impl MemoryState {
    /// Drops seats the session no longer holds (expired, released elsewhere,
    /// confirmed) and clears the whole set once its lifetime has passed.
    fn prune_session(&mut self, session: &SessionId, now: DateTime<Utc>) {
        let holds = &self.holds;
        if let Some(entry) = self.sessions.get_mut(session) {
            if entry.expires_at <= now {
                entry.seats.clear();
                return;
            }
            entry.seats.retain(|seat| {
                holds
                    .get(seat)
                    .map(|h| h.status == HoldStatus::Held && h.is_live(now) && h.is_owned_by(session))
                    .unwrap_or(false)
            });
        }
    }

    fn remove_from_session(&mut self, session: &SessionId, seat: &SeatKey) {
        if let Some(entry) = self.sessions.get_mut(session) {
            entry.seats.remove(seat);
        }
    }

    fn live_hold(&self, seat: &SeatKey, now: DateTime<Utc>) -> Option<&SeatHold> {
        self.holds.get(seat).filter(|h| h.is_live(now))
    }
}

#[derive(Debug, Default)]
pub struct MemoryHoldStore {
    state: Mutex<MemoryState>,
}

impl MemoryHoldStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HoldStore for MemoryHoldStore {
    async fn acquire(
        &self,
        hold: &SeatHold,
        max_per_session: usize,
        session_ttl: Duration,
        now: DateTime<Utc>,
    ) -> SeatingResult<AcquireOutcome> {
        let mut state = self.state.lock().await;

        if let Some(reason) = state.blocked.get(&hold.seat) {
            return Ok(AcquireOutcome::Blocked { reason: reason.clone() });
        }

        state.prune_session(&hold.session_id, now);

        if let Some(existing) = state.live_hold(&hold.seat, now) {
            if existing.status == HoldStatus::Confirmed {
                return Ok(AcquireOutcome::Sold);
            }
            if existing.is_owned_by(&hold.session_id) {
                return Ok(AcquireOutcome::AlreadyOwned(existing.clone()));
            }
            return Ok(AcquireOutcome::Contended {
                owner: existing.session_id.clone(),
            });
        }

        let count = state
            .sessions
            .get(&hold.session_id)
            .map(|e| e.seats.len())
            .unwrap_or(0);
        if count >= max_per_session {
            return Ok(AcquireOutcome::SessionFull { count });
        }

        state.holds.insert(hold.seat.clone(), hold.clone());
        let entry = state
            .sessions
            .entry(hold.session_id.clone())
            .or_insert_with(|| SessionEntry {
                seats: BTreeSet::new(),
                expires_at: now + session_ttl,
            });
        entry.seats.insert(hold.seat.clone());
        entry.expires_at = now + session_ttl;

        Ok(AcquireOutcome::Acquired(hold.clone()))
    }

    async fn get(&self, seat: &SeatKey) -> SeatingResult<Option<SeatHold>> {
        let state = self.state.lock().await;
        Ok(state.holds.get(seat).cloned())
    }

    async fn seat_state(&self, seat: &SeatKey, now: DateTime<Utc>) -> SeatingResult<SeatState> {
        let state = self.state.lock().await;

        if let Some(reason) = state.blocked.get(seat) {
            return Ok(SeatState::Blocked { reason: reason.clone() });
        }

        Ok(match state.live_hold(seat, now) {
            Some(h) if h.status == HoldStatus::Confirmed => SeatState::Sold(h.clone()),
            Some(h) => SeatState::Held(h.clone()),
            None => SeatState::Free,
        })
    }

    async fn release(
        &self,
        seat: &SeatKey,
        session: &SessionId,
        now: DateTime<Utc>,
    ) -> SeatingResult<ReleaseOutcome> {
        let mut state = self.state.lock().await;

        let Some(existing) = state.live_hold(seat, now).cloned() else {
            state.remove_from_session(session, seat);
            return Ok(ReleaseOutcome::NotFound);
        };

        if !existing.is_owned_by(session) {
            return Ok(ReleaseOutcome::NotOwner {
                owner: existing.session_id,
            });
        }
        if existing.status == HoldStatus::Confirmed {
            return Ok(ReleaseOutcome::Confirmed);
        }

        state.holds.remove(seat);
        state.remove_from_session(session, seat);

        Ok(ReleaseOutcome::Released(SeatHold {
            status: HoldStatus::Released,
            ..existing
        }))
    }

    async fn confirm(
        &self,
        seat: &SeatKey,
        session: &SessionId,
        now: DateTime<Utc>,
    ) -> SeatingResult<ConfirmOutcome> {
        let mut state = self.state.lock().await;

        let Some(existing) = state.holds.get(seat).cloned() else {
            return Ok(ConfirmOutcome::NotFound);
        };
        let live = existing.is_live(now);

        if !existing.is_owned_by(session) {
            if live {
                return Ok(ConfirmOutcome::NotOwner {
                    owner: existing.session_id,
                });
            }
            return Ok(ConfirmOutcome::NotFound);
        }

        let status = existing.status;
        match status {
            HoldStatus::Confirmed => Ok(ConfirmOutcome::AlreadyConfirmed(existing)),
            HoldStatus::Held if live => {
                let confirmed = SeatHold {
                    status: HoldStatus::Confirmed,
                    ..existing
                };
                state.holds.insert(seat.clone(), confirmed.clone());
                state.remove_from_session(session, seat);
                Ok(ConfirmOutcome::Confirmed(confirmed))
            }
            HoldStatus::Held => {
                if let Some(h) = state.holds.get_mut(seat) {
                    h.status = HoldStatus::Expired;
                }
                state.remove_from_session(session, seat);
                Ok(ConfirmOutcome::Expired)
            }
            HoldStatus::Expired | HoldStatus::Released => Ok(ConfirmOutcome::Expired),
        }
    }

    async fn session_seats(&self, session: &SessionId, now: DateTime<Utc>) -> SeatingResult<Vec<SeatHold>> {
        let mut state = self.state.lock().await;
        state.prune_session(session, now);

        let seats = match state.sessions.get(session) {
            Some(entry) => entry
                .seats
                .iter()
                .filter_map(|seat| state.holds.get(seat).cloned())
                .collect(),
            None => Vec::new(),
        };
        Ok(seats)
    }

    async fn session_count(&self, session: &SessionId, now: DateTime<Utc>) -> SeatingResult<usize> {
        let mut state = self.state.lock().await;
        state.prune_session(session, now);
        Ok(state.sessions.get(session).map(|e| e.seats.len()).unwrap_or(0))
    }

    async fn touch_session(&self, session: &SessionId, ttl: Duration, now: DateTime<Utc>) -> SeatingResult<()> {
        let mut state = self.state.lock().await;
        state.prune_session(session, now);
        let entry = state
            .sessions
            .entry(session.clone())
            .or_insert_with(|| SessionEntry {
                seats: BTreeSet::new(),
                expires_at: now + ttl,
            });
        entry.expires_at = now + ttl;
        Ok(())
    }

    async fn block(&self, seats: &[SeatKey], reason: &str, now: DateTime<Utc>) -> SeatingResult<Vec<SeatKey>> {
        let mut state = self.state.lock().await;
        let mut blocked = Vec::new();

        for seat in seats {
            if state.live_hold(seat, now).is_some() || state.blocked.contains_key(seat) {
                continue;
            }
            state.blocked.insert(seat.clone(), reason.to_string());
            blocked.push(seat.clone());
        }

        Ok(blocked)
    }

    async fn unblock(&self, seats: &[SeatKey]) -> SeatingResult<Vec<SeatKey>> {
        let mut state = self.state.lock().await;
        Ok(seats
            .iter()
            .filter(|seat| state.blocked.remove(*seat).is_some())
            .cloned()
            .collect())
    }

    async fn blocked(&self, event_seating_id: i64) -> SeatingResult<Vec<(SeatKey, String)>> {
        let state = self.state.lock().await;
        let mut seats: Vec<(SeatKey, String)> = state
            .blocked
            .iter()
            .filter(|(seat, _)| seat.event_seating_id == event_seating_id)
            .map(|(seat, reason)| (seat.clone(), reason.clone()))
            .collect();
        seats.sort();
        Ok(seats)
    }

    async fn sweep(&self, now: DateTime<Utc>) -> SeatingResult<Vec<SeatHold>> {
        let mut state = self.state.lock().await;

        // Records expired by an earlier sweep have been observable long enough.
        state.holds.retain(|_, h| h.status != HoldStatus::Expired);

        let mut expired = Vec::new();
        for hold in state.holds.values_mut() {
            if hold.status == HoldStatus::Held && hold.expires_at <= now {
                hold.status = HoldStatus::Expired;
                expired.push(hold.clone());
            }
        }

        for hold in &expired {
            state.remove_from_session(&hold.session_id, &hold.seat);
        }
        state.sessions.retain(|_, e| e.expires_at > now || !e.seats.is_empty());

        if !expired.is_empty() {
            debug!(count = expired.len(), "Expired seat holds");
        }
        Ok(expired)
    }

    fn ttl_native(&self) -> bool {
        false
    }
}

/// Fixed-window counters kept in process.
///
/// Each entry carries its own reset instant. Entries whose window has
/// closed are dropped on every hit, so idle keys do not accumulate.
#[derive(Debug, Default)]
pub struct MemoryRateLimiter {
    windows: Mutex<HashMap<String, (u32, Instant)>>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with an open window.
    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimiter {
    async fn hit(&self, key: &str, limit: u32, window: std::time::Duration) -> SeatingResult<bool> {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();

        windows.retain(|_, (_, resets_at)| *resets_at > now);

        let entry = windows.entry(key.to_string()).or_insert((0, now + window));
        entry.0 += 1;

        Ok(entry.0 <= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> SessionId {
        SessionId::parse(id).unwrap()
    }

    fn hold(uid: &str, sid: &str, now: DateTime<Utc>) -> SeatHold {
        SeatHold::new(SeatKey::new(1, uid), session(sid), now, Duration::seconds(900))
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let store = MemoryHoldStore::new();
        let now = Utc::now();

        let first = store.acquire(&hold("A1", "s1", now), 10, Duration::seconds(1200), now).await.unwrap();
        assert!(matches!(first, AcquireOutcome::Acquired(_)));

        let again = store.acquire(&hold("A1", "s1", now), 10, Duration::seconds(1200), now).await.unwrap();
        assert!(matches!(again, AcquireOutcome::AlreadyOwned(_)));

        let other = store.acquire(&hold("A1", "s2", now), 10, Duration::seconds(1200), now).await.unwrap();
        assert_eq!(other, AcquireOutcome::Contended { owner: session("s1") });
    }

    #[tokio::test]
    async fn test_session_cap_counts_only_live_holds() {
        let store = MemoryHoldStore::new();
        let now = Utc::now();

        for uid in ["A1", "A2"] {
            store.acquire(&hold(uid, "s1", now), 2, Duration::seconds(1200), now).await.unwrap();
        }
        let full = store.acquire(&hold("A3", "s1", now), 2, Duration::seconds(1200), now).await.unwrap();
        assert_eq!(full, AcquireOutcome::SessionFull { count: 2 });

        // Past the hold deadline the stale entries no longer count.
        let later = now + Duration::seconds(901);
        let retry = store
            .acquire(&hold("A3", "s1", later), 2, Duration::seconds(1200), later)
            .await
            .unwrap();
        assert!(matches!(retry, AcquireOutcome::Acquired(_)));
        assert_eq!(store.session_count(&session("s1"), later).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_confirm_is_terminal() {
        let store = MemoryHoldStore::new();
        let now = Utc::now();
        let seat = SeatKey::new(1, "A1");
        store.acquire(&hold("A1", "s1", now), 10, Duration::seconds(1200), now).await.unwrap();

        let confirmed = store.confirm(&seat, &session("s1"), now).await.unwrap();
        assert!(matches!(confirmed, ConfirmOutcome::Confirmed(_)));
        assert_eq!(store.session_count(&session("s1"), now).await.unwrap(), 0);

        // Long past the TTL the seat stays sold and cannot be released.
        let later = now + Duration::days(2);
        assert!(matches!(store.seat_state(&seat, later).await.unwrap(), SeatState::Sold(_)));
        assert_eq!(store.release(&seat, &session("s1"), later).await.unwrap(), ReleaseOutcome::Confirmed);
        assert!(store.sweep(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_expires_and_frees() {
        let store = MemoryHoldStore::new();
        let now = Utc::now();
        let seat = SeatKey::new(1, "A1");
        store.acquire(&hold("A1", "s1", now), 10, Duration::seconds(1200), now).await.unwrap();

        assert!(store.sweep(now + Duration::seconds(899)).await.unwrap().is_empty());

        let expired = store.sweep(now + Duration::seconds(900)).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, HoldStatus::Expired);

        let record = store.get(&seat).await.unwrap().unwrap();
        assert_eq!(record.status, HoldStatus::Expired);
        assert_eq!(
            store.confirm(&seat, &session("s1"), now + Duration::seconds(901)).await.unwrap(),
            ConfirmOutcome::Expired
        );

        // The following sweep purges the expired record.
        store.sweep(now + Duration::seconds(960)).await.unwrap();
        assert!(store.get(&seat).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_block_skips_held_seats() {
        let store = MemoryHoldStore::new();
        let now = Utc::now();
        store.acquire(&hold("A1", "s1", now), 10, Duration::seconds(1200), now).await.unwrap();

        let seats = vec![SeatKey::new(1, "A1"), SeatKey::new(1, "A2")];
        let blocked = store.block(&seats, "technical", now).await.unwrap();
        assert_eq!(blocked, vec![SeatKey::new(1, "A2")]);

        let attempt = store.acquire(&hold("A2", "s2", now), 10, Duration::seconds(1200), now).await.unwrap();
        assert_eq!(attempt, AcquireOutcome::Blocked { reason: "technical".into() });

        assert_eq!(store.unblock(&seats).await.unwrap(), vec![SeatKey::new(1, "A2")]);
        assert!(store.blocked(1).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_window_resets() {
        let limiter = MemoryRateLimiter::new();
        let window = std::time::Duration::from_secs(60);

        assert!(limiter.hit("k", 2, window).await.unwrap());
        assert!(limiter.hit("k", 2, window).await.unwrap());
        assert!(!limiter.hit("k", 2, window).await.unwrap());

        tokio::time::advance(window).await;
        assert!(limiter.hit("k", 2, window).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_drops_closed_windows() {
        let limiter = MemoryRateLimiter::new();
        let window = std::time::Duration::from_secs(60);

        for i in 0..50 {
            limiter.hit(&format!("client-{i}"), 5, window).await.unwrap();
        }
        assert_eq!(limiter.tracked_keys().await, 50);

        tokio::time::advance(window).await;
        assert!(limiter.hit("fresh", 5, window).await.unwrap());
        assert_eq!(limiter.tracked_keys().await, 1);
    }
}
