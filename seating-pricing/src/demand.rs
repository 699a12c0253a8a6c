use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use seating_core::{EventSink, SeatingResult};
use seating_shared::{SeatingEvent, Topic};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;

/// Occupancy and sales velocity of one event at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DemandSnapshot {
    pub held: u32,
    pub sold: u32,
    pub sales_last_hour: u32,
}

#[derive(Debug, Default)]
struct EventDemand {
    /// Held seat uid to hold deadline
    holds: HashMap<String, Option<DateTime<Utc>>>,
    sold: HashSet<String>,
    sales: VecDeque<DateTime<Utc>>,
}

impl EventDemand {
    fn prune(&mut self, now: DateTime<Utc>) {
        self.holds
            .retain(|_, expires_at| expires_at.map_or(true, |at| now < at));
        let horizon = now - Duration::hours(1);
        while self.sales.front().is_some_and(|at| *at <= horizon) {
            self.sales.pop_front();
        }
    }
}

/// Feeds pricing inputs from the seat event stream.
///
/// Installed as one of the event sinks so every hold, release, sale and
/// expiry updates the counters without touching the hold store.
#[derive(Debug, Default)]
pub struct DemandTracker {
    events: RwLock<HashMap<i64, EventDemand>>,
}

impl DemandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, event: &SeatingEvent) {
        let mut events = self.events.write().await;
        let demand = events.entry(event.event_seating_id).or_default();

        match event.topic {
            Topic::SeatsHeld => {
                for uid in &event.seat_uids {
                    demand.holds.insert(uid.clone(), event.expires_at);
                }
            }
            Topic::SeatsReleased | Topic::SeatsExpired => {
                for uid in &event.seat_uids {
                    demand.holds.remove(uid);
                }
            }
            Topic::SeatsSold => {
                for uid in &event.seat_uids {
                    demand.holds.remove(uid);
                    if demand.sold.insert(uid.clone()) {
                        demand.sales.push_back(event.occurred_at);
                    }
                }
            }
            Topic::SeatsBlocked
            | Topic::SeatsUnblocked
            | Topic::PriceUpdated
            | Topic::OverrideApplied => {}
        }
    }

    pub async fn snapshot(&self, event_seating_id: i64, now: DateTime<Utc>) -> DemandSnapshot {
        let mut events = self.events.write().await;
        let Some(demand) = events.get_mut(&event_seating_id) else {
            return DemandSnapshot::default();
        };
        demand.prune(now);
        DemandSnapshot {
            held: demand.holds.len() as u32,
            sold: demand.sold.len() as u32,
            sales_last_hour: demand.sales.len() as u32,
        }
    }

    pub async fn forget(&self, event_seating_id: i64) {
        self.events.write().await.remove(&event_seating_id);
    }
}

#[async_trait]
impl EventSink for DemandTracker {
    async fn publish(&self, event: &SeatingEvent) -> SeatingResult<()> {
        self.record(event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(topic: Topic, uids: &[&str], at: DateTime<Utc>) -> SeatingEvent {
        SeatingEvent::new(topic, 5, uids.iter().map(|u| u.to_string()).collect(), at)
    }

    #[tokio::test]
    async fn test_counts_follow_seat_lifecycle() {
        let tracker = DemandTracker::new();
        let now = Utc::now();

        tracker
            .publish(&event(Topic::SeatsHeld, &["A1", "A2", "A3"], now).with_expiry(now + Duration::minutes(15)))
            .await
            .unwrap();
        tracker.publish(&event(Topic::SeatsReleased, &["A3"], now)).await.unwrap();
        tracker.publish(&event(Topic::SeatsSold, &["A1"], now)).await.unwrap();

        let snap = tracker.snapshot(5, now).await;
        assert_eq!(snap, DemandSnapshot { held: 1, sold: 1, sales_last_hour: 1 });
        assert_eq!(tracker.snapshot(6, now).await, DemandSnapshot::default());
    }

    #[tokio::test]
    async fn test_lapsed_holds_and_old_sales_age_out() {
        let tracker = DemandTracker::new();
        let now = Utc::now();

        tracker
            .record(&event(Topic::SeatsHeld, &["B1"], now).with_expiry(now + Duration::minutes(15)))
            .await;
        tracker.record(&event(Topic::SeatsSold, &["B2"], now)).await;
        // Duplicate sale events count once.
        tracker.record(&event(Topic::SeatsSold, &["B2"], now)).await;

        let later = now + Duration::minutes(61);
        let snap = tracker.snapshot(5, later).await;
        assert_eq!(snap, DemandSnapshot { held: 0, sold: 1, sales_last_hour: 0 });
    }
}
