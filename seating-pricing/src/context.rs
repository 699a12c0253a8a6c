use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inputs a pricing strategy works from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingContext {
    /// Base price of the seat (in cents)
    pub base_price_cents: i64,

    /// Total sellable seats of the event
    pub capacity: u32,

    /// Seats confirmed so far
    pub sold: u32,

    /// Seats currently under a live hold
    pub held: u32,

    /// Confirmed seats over the trailing hour
    pub sales_last_hour: u32,

    /// Event start, required by time-based pricing
    pub event_starts_at: Option<DateTime<Utc>>,

    /// Evaluation time
    pub now: DateTime<Utc>,

    /// Bounds applied after the strategy runs
    #[serde(default)]
    pub bounds: PriceBounds,
}

impl PricingContext {
    pub fn new(base_price_cents: i64, capacity: u32, now: DateTime<Utc>) -> Self {
        Self {
            base_price_cents,
            capacity,
            sold: 0,
            held: 0,
            sales_last_hour: 0,
            event_starts_at: None,
            now,
            bounds: PriceBounds::default(),
        }
    }

    /// Share of capacity that is sold or held, in `[0, 1]`.
    pub fn occupancy(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        let taken = self.sold.saturating_add(self.held) as f64;
        (taken / self.capacity as f64).min(1.0)
    }

    /// Whole hours until the event starts; negative once it has started.
    pub fn hours_until_start(&self) -> Option<i64> {
        self.event_starts_at.map(|start| (start - self.now).num_hours())
    }
}

/// Floor and ceiling for one seat's price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBounds {
    pub floor_cents: Option<i64>,
    pub ceiling_cents: Option<i64>,
}

impl PriceBounds {
    pub fn new(floor_cents: Option<i64>, ceiling_cents: Option<i64>) -> Self {
        Self {
            floor_cents,
            ceiling_cents,
        }
    }

    /// Fills unset bounds from `defaults`.
    pub fn or(self, defaults: PriceBounds) -> Self {
        Self {
            floor_cents: self.floor_cents.or(defaults.floor_cents),
            ceiling_cents: self.ceiling_cents.or(defaults.ceiling_cents),
        }
    }

    pub fn clamp(&self, price_cents: i64) -> i64 {
        let mut price = price_cents;
        if let Some(floor) = self.floor_cents {
            price = price.max(floor);
        }
        if let Some(ceiling) = self.ceiling_cents {
            price = price.min(ceiling);
        }
        price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_occupancy() {
        let mut ctx = PricingContext::new(10_000, 200, Utc::now());
        ctx.sold = 120;
        ctx.held = 30;
        assert!((ctx.occupancy() - 0.75).abs() < f64::EPSILON);

        ctx.capacity = 0;
        assert_eq!(ctx.occupancy(), 0.0);
    }

    #[test]
    fn test_hours_until_start() {
        let now = Utc::now();
        let mut ctx = PricingContext::new(10_000, 10, now);
        assert_eq!(ctx.hours_until_start(), None);

        ctx.event_starts_at = Some(now + Duration::hours(30));
        assert_eq!(ctx.hours_until_start(), Some(30));
    }

    #[test]
    fn test_bounds_merge_and_clamp() {
        let bounds = PriceBounds::new(Some(5_000), None).or(PriceBounds::new(Some(1_000), Some(20_000)));
        assert_eq!(bounds, PriceBounds::new(Some(5_000), Some(20_000)));
        assert_eq!(bounds.clamp(100), 5_000);
        assert_eq!(bounds.clamp(50_000), 20_000);
        assert_eq!(bounds.clamp(12_345), 12_345);
    }
}
