use chrono::Duration;
use seating_core::{Clock, HoldStore, SeatHold, SeatingResult, SessionId};
use std::sync::Arc;
use uuid::Uuid;

/// Per-session view over the hold store: the set of seats a session holds
/// and the cap on its size.
#[derive(Clone)]
pub struct SessionTracker {
    store: Arc<dyn HoldStore>,
    clock: Arc<dyn Clock>,
    limit: usize,
    session_ttl: Duration,
}

impl SessionTracker {
    pub fn new(store: Arc<dyn HoldStore>, clock: Arc<dyn Clock>, limit: usize, session_ttl: Duration) -> Self {
        Self {
            store,
            clock,
            limit,
            session_ttl,
        }
    }

    /// Fresh random session id for clients that did not send one.
    pub fn mint() -> SeatingResult<SessionId> {
        SessionId::parse(&Uuid::new_v4().to_string())
    }

    pub async fn register(&self, session: &SessionId) -> SeatingResult<()> {
        self.store
            .touch_session(session, self.session_ttl, self.clock.now())
            .await
    }

    pub async fn count(&self, session: &SessionId) -> SeatingResult<usize> {
        self.store.session_count(session, self.clock.now()).await
    }

    pub async fn holds(&self, session: &SessionId) -> SeatingResult<Vec<SeatHold>> {
        let mut holds = self.store.session_seats(session, self.clock.now()).await?;
        holds.sort_by(|a, b| a.seat.cmp(&b.seat));
        Ok(holds)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minted_ids_are_valid_and_unique() {
        let a = SessionTracker::mint().unwrap();
        let b = SessionTracker::mint().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }
}
