use chrono::{DateTime, Duration, Utc};
use seating_core::{
    Clock, EventSink, PriceQuote, PriceSource, SeatKey, SeatingError, SeatingResult,
};
use seating_shared::{SeatingEvent, Topic};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::context::{PriceBounds, PricingContext};
use crate::strategy::{PricingStrategy, Strategy};

#[derive(Debug, Clone)]
pub struct PricingEngineConfig {
    /// When off, quotes are the bounded base price and nothing is cached
    pub enabled: bool,

    /// Minimum time between two strategy runs for one seat
    pub cooldown: Duration,

    /// How long `current_price` serves a quote without recomputing
    pub cache_ttl: Duration,

    /// Largest step between consecutive quotes, as a percentage of the previous price
    pub max_change_percent: f64,

    pub enforce_bounds: bool,

    /// Engine-wide floor/ceiling, overridable per call
    pub bounds: PriceBounds,

    /// Extra attempts when another computation for the seat is in flight
    pub retry_count: u32,

    pub retry_delay: std::time::Duration,

    /// Prices are rounded to a multiple of this (in cents)
    pub rounding_cents: i64,
}

impl Default for PricingEngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown: Duration::seconds(120),
            cache_ttl: Duration::seconds(60),
            max_change_percent: 50.0,
            enforce_bounds: true,
            bounds: PriceBounds::default(),
            retry_count: 3,
            retry_delay: std::time::Duration::from_millis(100),
            rounding_cents: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingState {
    Idle,
    Computing,
    Cached,
}

#[derive(Debug, Default)]
struct SeatPricing {
    computing: bool,
    quote: Option<PriceQuote>,
    cooldown_until: Option<DateTime<Utc>>,
    cached_until: Option<DateTime<Utc>>,
    /// Bumped by overrides and invalidation so an in-flight computation
    /// cannot overwrite them.
    epoch: u64,
}

impl SeatPricing {
    fn state(&self, now: DateTime<Utc>) -> PricingState {
        if self.computing {
            PricingState::Computing
        } else if self.quote.is_some() && self.cooldown_until.is_some_and(|until| now < until) {
            PricingState::Cached
        } else {
            PricingState::Idle
        }
    }

    fn store(&mut self, quote: PriceQuote, cooldown: Duration, cache_ttl: Duration) {
        let at = quote.computed_at;
        self.quote = Some(quote);
        self.cooldown_until = Some(at + cooldown);
        self.cached_until = Some(at + cache_ttl);
    }
}

type SeatMap = HashMap<SeatKey, SeatPricing>;

fn lock_seats(seats: &Mutex<SeatMap>) -> MutexGuard<'_, SeatMap> {
    seats.lock().unwrap_or_else(|e| e.into_inner())
}

enum Claim {
    Cooled(PriceQuote),
    Busy(Option<PriceQuote>),
    Claimed {
        previous: Option<PriceQuote>,
        epoch: u64,
    },
}

/// Holds a seat's `Computing` flag. Dropping the guard clears the flag, so a
/// computation that errors, panics or is cancelled leaves the seat `Idle`.
struct ClaimGuard<'a> {
    seats: &'a Mutex<SeatMap>,
    seat: &'a SeatKey,
    armed: bool,
}

impl ClaimGuard<'_> {
    /// Called with the flag already cleared under the seat lock.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(entry) = lock_seats(self.seats).get_mut(self.seat) {
            entry.computing = false;
        }
    }
}

/// Per-seat dynamic pricing with cooldown, step and bound guards.
///
/// Each seat moves `Idle -> Computing -> Cached`, falling back to `Idle`
/// once its cooldown lapses. At most one computation per seat runs at a time.
///
/// The seat map lock is never held across an await point.
pub struct DynamicPricingEngine {
    config: PricingEngineConfig,
    seats: Mutex<SeatMap>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl DynamicPricingEngine {
    pub fn new(config: PricingEngineConfig, clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            seats: Mutex::new(HashMap::new()),
            clock,
            events,
        }
    }

    pub fn config(&self) -> &PricingEngineConfig {
        &self.config
    }

    pub async fn compute_price(
        &self,
        seat: &SeatKey,
        strategy: &Strategy,
        ctx: &PricingContext,
    ) -> SeatingResult<PriceQuote> {
        let bounds = ctx.bounds.or(self.config.bounds);
        if !self.config.enabled {
            return Ok(self.static_quote(seat, strategy, ctx, bounds));
        }

        let mut failed_attempts = 0u32;
        let (previous, epoch) = loop {
            match self.claim(seat) {
                Claim::Cooled(quote) => return Ok(quote),
                Claim::Claimed { previous, epoch } => break (previous, epoch),
                Claim::Busy(cached) => {
                    failed_attempts += 1;
                    if failed_attempts > self.config.retry_count {
                        tracing::warn!(seat = %seat, attempts = failed_attempts, "Pricing computation still in flight, giving up");
                        return match cached {
                            Some(quote) => Ok(quote.as_fallback()),
                            None => Err(SeatingError::ConcurrencyConflict {
                                seat: seat.clone(),
                                attempts: failed_attempts,
                            }),
                        };
                    }
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        };

        let mut claim = ClaimGuard {
            seats: &self.seats,
            seat,
            armed: true,
        };

        let raw = match strategy.compute(ctx) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(seat = %seat, strategy = strategy.kind().as_str(), error = %e, "Strategy failed");
                return match previous {
                    Some(quote) => Ok(quote.as_fallback()),
                    None => Err(SeatingError::PricingUnavailable { seat: seat.clone() }),
                };
            }
        };

        let previous_cents = previous.as_ref().map(|q| q.price_cents);
        let price_cents = self.guard(raw, previous_cents, bounds);
        let quote = PriceQuote {
            seat: seat.clone(),
            source: PriceSource::Strategy(strategy.kind()),
            price_cents,
            previous_cents,
            floor_cents: bounds.floor_cents,
            ceiling_cents: bounds.ceiling_cents,
            computed_at: self.clock.now(),
            from_fallback: false,
        };

        {
            let mut seats = lock_seats(&self.seats);
            let entry = seats.entry(seat.clone()).or_default();
            entry.computing = false;
            claim.disarm();
            if entry.epoch != epoch {
                // Overridden or invalidated while computing.
                return Ok(entry.quote.clone().unwrap_or(quote));
            }
            entry.store(quote.clone(), self.config.cooldown, self.config.cache_ttl);
        }

        tracing::debug!(seat = %seat, raw, price_cents, previous = ?previous_cents, "Price computed");
        if previous_cents != Some(price_cents) {
            self.publish(Topic::PriceUpdated, &quote).await;
        }
        Ok(quote)
    }

    /// Quote still inside its cache window.
    pub async fn current_price(&self, seat: &SeatKey) -> Option<PriceQuote> {
        let now = self.clock.now();
        let seats = lock_seats(&self.seats);
        let entry = seats.get(seat)?;
        match entry.cached_until {
            Some(until) if now < until => entry.quote.clone(),
            _ => None,
        }
    }

    /// Most recent quote regardless of cache expiry.
    pub async fn last_quote(&self, seat: &SeatKey) -> Option<PriceQuote> {
        lock_seats(&self.seats).get(seat).and_then(|e| e.quote.clone())
    }

    pub async fn state(&self, seat: &SeatKey) -> PricingState {
        let now = self.clock.now();
        lock_seats(&self.seats)
            .get(seat)
            .map(|e| e.state(now))
            .unwrap_or(PricingState::Idle)
    }

    /// Sets a seat's price by hand. Skips cooldown and the step clamp but
    /// still honours floor and ceiling.
    pub async fn apply_override(
        &self,
        seat: &SeatKey,
        price_cents: i64,
        bounds: PriceBounds,
    ) -> SeatingResult<PriceQuote> {
        if price_cents <= 0 {
            return Err(SeatingError::Validation("override price must be positive".into()));
        }
        let bounds = bounds.or(self.config.bounds);
        let clamped = if self.config.enforce_bounds {
            bounds.clamp(price_cents)
        } else {
            price_cents
        };

        let quote = {
            let mut seats = lock_seats(&self.seats);
            let entry = seats.entry(seat.clone()).or_default();
            let quote = PriceQuote {
                seat: seat.clone(),
                source: PriceSource::Override,
                price_cents: clamped,
                previous_cents: entry.quote.as_ref().map(|q| q.price_cents),
                floor_cents: bounds.floor_cents,
                ceiling_cents: bounds.ceiling_cents,
                computed_at: self.clock.now(),
                from_fallback: false,
            };
            entry.epoch += 1;
            entry.store(quote.clone(), self.config.cooldown, self.config.cache_ttl);
            quote
        };

        tracing::info!(seat = %seat, requested = price_cents, price_cents = clamped, "Price override applied");
        self.publish(Topic::OverrideApplied, &quote).await;
        Ok(quote)
    }

    pub async fn invalidate(&self, seat: &SeatKey) {
        let mut seats = lock_seats(&self.seats);
        let remove = match seats.get_mut(seat) {
            Some(entry) if entry.computing => {
                Self::clear(entry);
                false
            }
            Some(_) => true,
            None => false,
        };
        if remove {
            seats.remove(seat);
        }
    }

    pub async fn invalidate_event(&self, event_seating_id: i64) {
        let mut seats = lock_seats(&self.seats);
        seats.retain(|key, entry| {
            if key.event_seating_id != event_seating_id {
                return true;
            }
            if entry.computing {
                Self::clear(entry);
                return true;
            }
            false
        });
    }

    /// Seats of an event that carry a quote.
    pub async fn quoted_seats(&self, event_seating_id: i64) -> Vec<SeatKey> {
        let seats = lock_seats(&self.seats);
        let mut keys: Vec<SeatKey> = seats
            .iter()
            .filter(|(k, e)| k.event_seating_id == event_seating_id && e.quote.is_some())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn clear(entry: &mut SeatPricing) {
        entry.quote = None;
        entry.cooldown_until = None;
        entry.cached_until = None;
        entry.epoch += 1;
    }

    fn claim(&self, seat: &SeatKey) -> Claim {
        let now = self.clock.now();
        let mut seats = lock_seats(&self.seats);
        let entry = seats.entry(seat.clone()).or_default();
        match entry.state(now) {
            PricingState::Computing => Claim::Busy(entry.quote.clone()),
            PricingState::Cached => match entry.quote.clone() {
                Some(quote) => Claim::Cooled(quote),
                None => Claim::Busy(None),
            },
            PricingState::Idle => {
                entry.computing = true;
                Claim::Claimed {
                    previous: entry.quote.clone(),
                    epoch: entry.epoch,
                }
            }
        }
    }

    /// Rounding, then the step clamp against the previous quote, then bounds.
    fn guard(&self, raw: i64, previous_cents: Option<i64>, bounds: PriceBounds) -> i64 {
        let mut price = self.round(raw);

        if let Some(previous) = previous_cents.filter(|p| *p > 0) {
            let max_delta = (previous as f64 * self.config.max_change_percent.max(0.0) / 100.0).floor() as i64;
            price = price.clamp(previous - max_delta, previous + max_delta);
        }

        if self.config.enforce_bounds {
            price = bounds.clamp(price);
        }
        price.max(0)
    }

    fn round(&self, price: i64) -> i64 {
        let step = self.config.rounding_cents;
        if step <= 1 {
            return price;
        }
        let remainder = price.rem_euclid(step);
        if remainder * 2 >= step {
            price + (step - remainder)
        } else {
            price - remainder
        }
    }

    fn static_quote(
        &self,
        seat: &SeatKey,
        strategy: &Strategy,
        ctx: &PricingContext,
        bounds: PriceBounds,
    ) -> PriceQuote {
        let price_cents = if self.config.enforce_bounds {
            bounds.clamp(ctx.base_price_cents)
        } else {
            ctx.base_price_cents
        };
        PriceQuote {
            seat: seat.clone(),
            source: PriceSource::Strategy(strategy.kind()),
            price_cents,
            previous_cents: None,
            floor_cents: bounds.floor_cents,
            ceiling_cents: bounds.ceiling_cents,
            computed_at: self.clock.now(),
            from_fallback: false,
        }
    }

    async fn publish(&self, topic: Topic, quote: &PriceQuote) {
        let event = SeatingEvent::new(
            topic,
            quote.seat.event_seating_id,
            vec![quote.seat.seat_uid.clone()],
            quote.computed_at,
        )
        .with_price(quote.price_cents);
        if let Err(e) = self.events.publish(&event).await {
            tracing::error!(seat = %quote.seat, topic = %topic, error = %e, "Failed to publish pricing event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{Adjustment, CustomRuleStrategy, PricingRule, RuleCondition, ThresholdStrategy};
    use async_trait::async_trait;
    use seating_core::{ManualClock, NoopEventSink};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        events: StdMutex<Vec<SeatingEvent>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, event: &SeatingEvent) -> SeatingResult<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn flat(adjust_pct: f64) -> Strategy {
        Strategy::Custom(CustomRuleStrategy::new(vec![PricingRule {
            name: "flat".into(),
            condition: RuleCondition::DemandBased { min_sales_per_hour: 0 },
            adjustment: Adjustment::Percentage(adjust_pct),
            priority: 0,
            is_active: true,
        }]))
    }

    fn engine(clock: &ManualClock) -> DynamicPricingEngine {
        DynamicPricingEngine::new(
            PricingEngineConfig::default(),
            Arc::new(clock.clone()),
            Arc::new(NoopEventSink),
        )
    }

    fn ctx(base: i64, clock: &ManualClock) -> PricingContext {
        PricingContext::new(base, 100, clock.now())
    }

    #[tokio::test]
    async fn test_first_quote_is_unclamped_and_cached() {
        let clock = ManualClock::default();
        let engine = engine(&clock);
        let seat = SeatKey::new(1, "A1");

        let quote = engine.compute_price(&seat, &flat(200.0), &ctx(10_000, &clock)).await.unwrap();
        assert_eq!(quote.price_cents, 30_000);
        assert_eq!(quote.previous_cents, None);
        assert_eq!(engine.state(&seat).await, PricingState::Cached);
        assert_eq!(engine.current_price(&seat).await, Some(quote));
    }

    #[tokio::test]
    async fn test_cooldown_returns_cached_quote() {
        let clock = ManualClock::default();
        let engine = engine(&clock);
        let seat = SeatKey::new(1, "A1");

        let first = engine.compute_price(&seat, &flat(0.0), &ctx(10_000, &clock)).await.unwrap();
        clock.advance(Duration::seconds(60));
        let second = engine.compute_price(&seat, &flat(20.0), &ctx(10_000, &clock)).await.unwrap();
        assert_eq!(second, first);

        clock.advance(Duration::seconds(61));
        assert_eq!(engine.state(&seat).await, PricingState::Idle);
        let third = engine.compute_price(&seat, &flat(20.0), &ctx(10_000, &clock)).await.unwrap();
        assert_eq!(third.price_cents, 12_000);
        assert_eq!(third.previous_cents, Some(10_000));
    }

    #[tokio::test]
    async fn test_step_change_is_clamped() {
        let clock = ManualClock::default();
        let engine = engine(&clock);
        let seat = SeatKey::new(1, "A1");

        engine.compute_price(&seat, &flat(0.0), &ctx(10_000, &clock)).await.unwrap();

        clock.advance(Duration::seconds(121));
        let up = engine.compute_price(&seat, &flat(0.0), &ctx(40_000, &clock)).await.unwrap();
        assert_eq!(up.price_cents, 15_000);

        clock.advance(Duration::seconds(121));
        let down = engine.compute_price(&seat, &flat(0.0), &ctx(1_000, &clock)).await.unwrap();
        assert_eq!(down.price_cents, 7_500);
    }

    #[tokio::test]
    async fn test_bounds_applied_after_step_clamp() {
        let clock = ManualClock::default();
        let engine = engine(&clock);
        let seat = SeatKey::new(1, "A1");
        let mut context = ctx(10_000, &clock);
        context.bounds = PriceBounds::new(Some(9_000), Some(11_000));

        let quote = engine.compute_price(&seat, &flat(30.0), &context).await.unwrap();
        assert_eq!(quote.price_cents, 11_000);
        assert_eq!(quote.ceiling_cents, Some(11_000));
    }

    #[tokio::test]
    async fn test_strategy_failure_falls_back_to_cached() {
        let clock = ManualClock::default();
        let engine = engine(&clock);
        let seat = SeatKey::new(1, "A1");
        let threshold = Strategy::Threshold(ThresholdStrategy::default());

        let mut no_capacity = ctx(10_000, &clock);
        no_capacity.capacity = 0;
        let err = engine.compute_price(&seat, &threshold, &no_capacity).await.unwrap_err();
        assert!(matches!(err, SeatingError::PricingUnavailable { .. }));
        assert_eq!(engine.state(&seat).await, PricingState::Idle);

        let good = engine.compute_price(&seat, &threshold, &ctx(10_000, &clock)).await.unwrap();
        clock.advance(Duration::seconds(121));
        no_capacity.now = clock.now();
        let fallback = engine.compute_price(&seat, &threshold, &no_capacity).await.unwrap();
        assert!(fallback.from_fallback);
        assert_eq!(fallback.price_cents, good.price_cents);
    }

    #[tokio::test]
    async fn test_override_bypasses_cooldown_but_not_bounds() {
        let clock = ManualClock::default();
        let sink = Arc::new(RecordingSink::default());
        let engine = DynamicPricingEngine::new(PricingEngineConfig::default(), Arc::new(clock.clone()), sink.clone());
        let seat = SeatKey::new(3, "C9");

        engine.compute_price(&seat, &flat(0.0), &ctx(10_000, &clock)).await.unwrap();
        let quote = engine
            .apply_override(&seat, 50_000, PriceBounds::new(None, Some(25_000)))
            .await
            .unwrap();

        assert_eq!(quote.price_cents, 25_000);
        assert_eq!(quote.source, PriceSource::Override);
        assert_eq!(quote.previous_cents, Some(10_000));
        assert_eq!(engine.current_price(&seat).await.unwrap().price_cents, 25_000);

        let topics: Vec<Topic> = sink.events.lock().unwrap().iter().map(|e| e.topic).collect();
        assert_eq!(topics, vec![Topic::PriceUpdated, Topic::OverrideApplied]);
        assert!(engine.apply_override(&seat, 0, PriceBounds::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_cache_ttl_shorter_than_cooldown() {
        let clock = ManualClock::default();
        let engine = engine(&clock);
        let seat = SeatKey::new(1, "A1");

        engine.compute_price(&seat, &flat(0.0), &ctx(10_000, &clock)).await.unwrap();
        clock.advance(Duration::seconds(61));
        assert!(engine.current_price(&seat).await.is_none());
        assert!(engine.last_quote(&seat).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_event_drops_quotes() {
        let clock = ManualClock::default();
        let engine = engine(&clock);
        for uid in ["A1", "A2"] {
            engine.compute_price(&SeatKey::new(1, uid), &flat(0.0), &ctx(10_000, &clock)).await.unwrap();
        }
        engine.compute_price(&SeatKey::new(2, "A1"), &flat(0.0), &ctx(10_000, &clock)).await.unwrap();

        assert_eq!(engine.quoted_seats(1).await.len(), 2);
        engine.invalidate_event(1).await;
        assert!(engine.quoted_seats(1).await.is_empty());
        assert_eq!(engine.quoted_seats(2).await, vec![SeatKey::new(2, "A1")]);

        engine.invalidate(&SeatKey::new(2, "A1")).await;
        assert_eq!(engine.state(&SeatKey::new(2, "A1")).await, PricingState::Idle);
    }

    #[tokio::test]
    async fn test_negative_max_change_pins_price() {
        let clock = ManualClock::default();
        let engine = DynamicPricingEngine::new(
            PricingEngineConfig {
                max_change_percent: -10.0,
                ..Default::default()
            },
            Arc::new(clock.clone()),
            Arc::new(NoopEventSink),
        );
        let seat = SeatKey::new(1, "A1");

        engine.compute_price(&seat, &flat(0.0), &ctx(10_000, &clock)).await.unwrap();
        clock.advance(Duration::seconds(121));
        let second = engine.compute_price(&seat, &flat(0.0), &ctx(20_000, &clock)).await.unwrap();

        assert_eq!(second.price_cents, 10_000);
        assert!(!second.from_fallback);
        assert_eq!(engine.state(&seat).await, PricingState::Cached);
    }

    #[tokio::test]
    async fn test_abandoned_claim_returns_seat_to_idle() {
        let clock = ManualClock::default();
        let engine = engine(&clock);
        let seat = SeatKey::new(1, "A1");

        assert!(matches!(engine.claim(&seat), Claim::Claimed { .. }));
        assert_eq!(engine.state(&seat).await, PricingState::Computing);

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _claim = ClaimGuard {
                seats: &engine.seats,
                seat: &seat,
                armed: true,
            };
            panic!("computation aborted");
        }));
        assert!(unwound.is_err());
        assert_eq!(engine.state(&seat).await, PricingState::Idle);

        let quote = engine.compute_price(&seat, &flat(0.0), &ctx(10_000, &clock)).await.unwrap();
        assert!(!quote.from_fallback);
        assert_eq!(quote.price_cents, 10_000);
    }

    #[tokio::test]
    async fn test_rounding() {
        let clock = ManualClock::default();
        let engine = DynamicPricingEngine::new(
            PricingEngineConfig {
                rounding_cents: 50,
                ..Default::default()
            },
            Arc::new(clock.clone()),
            Arc::new(NoopEventSink),
        );
        let quote = engine
            .compute_price(&SeatKey::new(1, "A1"), &flat(0.0), &ctx(10_030, &clock))
            .await
            .unwrap();
        assert_eq!(quote.price_cents, 10_050);
    }

    #[tokio::test]
    async fn test_disabled_engine_returns_base_price() {
        let clock = ManualClock::default();
        let engine = DynamicPricingEngine::new(
            PricingEngineConfig {
                enabled: false,
                ..Default::default()
            },
            Arc::new(clock.clone()),
            Arc::new(NoopEventSink),
        );
        let seat = SeatKey::new(1, "A1");
        let quote = engine.compute_price(&seat, &flat(80.0), &ctx(10_000, &clock)).await.unwrap();
        assert_eq!(quote.price_cents, 10_000);
        assert!(engine.last_quote(&seat).await.is_none());
    }
}
