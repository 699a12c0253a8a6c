use seating_core::{Clock, PriceQuote, PricingStrategyKind, SeatKey, SeatingError, SeatingResult};
use std::sync::Arc;

use crate::context::PricingContext;
use crate::demand::DemandTracker;
use crate::engine::DynamicPricingEngine;
use crate::profiles::{EventPricingProfile, PricingProfiles};

/// Ties the engine to registered profiles and live demand.
#[derive(Clone)]
pub struct PricingService {
    engine: Arc<DynamicPricingEngine>,
    profiles: Arc<PricingProfiles>,
    demand: Arc<DemandTracker>,
    clock: Arc<dyn Clock>,
    default_strategy: PricingStrategyKind,
}

impl PricingService {
    pub fn new(
        engine: Arc<DynamicPricingEngine>,
        profiles: Arc<PricingProfiles>,
        demand: Arc<DemandTracker>,
        clock: Arc<dyn Clock>,
        default_strategy: PricingStrategyKind,
    ) -> Self {
        Self {
            engine,
            profiles,
            demand,
            clock,
            default_strategy,
        }
    }

    pub fn engine(&self) -> &DynamicPricingEngine {
        &self.engine
    }

    pub fn profiles(&self) -> &PricingProfiles {
        &self.profiles
    }

    /// Cached quote when fresh, otherwise a new computation.
    pub async fn quote(&self, seat: &SeatKey) -> SeatingResult<PriceQuote> {
        if let Some(quote) = self.engine.current_price(seat).await {
            return Ok(quote);
        }

        let Some(profile) = self.profiles.get(seat.event_seating_id).await else {
            return match self.engine.last_quote(seat).await {
                Some(quote) => Ok(quote.as_fallback()),
                None => Err(SeatingError::PricingUnavailable { seat: seat.clone() }),
            };
        };

        let ctx = self.context(seat, &profile).await;
        let strategy = profile.strategy(self.default_strategy);
        self.engine.compute_price(seat, &strategy, &ctx).await
    }

    pub async fn register_profile(
        &self,
        event_seating_id: i64,
        profile: EventPricingProfile,
    ) -> SeatingResult<()> {
        self.profiles.upsert(event_seating_id, profile).await?;
        self.engine.invalidate_event(event_seating_id).await;
        Ok(())
    }

    pub async fn override_price(&self, seat: &SeatKey, price_cents: i64) -> SeatingResult<PriceQuote> {
        let bounds = self
            .profiles
            .get(seat.event_seating_id)
            .await
            .map(|p| p.bounds())
            .unwrap_or_default();
        self.engine.apply_override(seat, price_cents, bounds).await
    }

    /// Recomputes every quoted seat of an event. Seats still cooling down
    /// keep their quote. Returns how many seats produced a quote.
    pub async fn recompute_event(&self, event_seating_id: i64) -> SeatingResult<usize> {
        let profile = self
            .profiles
            .get(event_seating_id)
            .await
            .ok_or_else(|| SeatingError::Validation(format!("no pricing profile for event {}", event_seating_id)))?;
        let strategy = profile.strategy(self.default_strategy);

        let mut priced = 0;
        for seat in self.engine.quoted_seats(event_seating_id).await {
            let ctx = self.context(&seat, &profile).await;
            match self.engine.compute_price(&seat, &strategy, &ctx).await {
                Ok(_) => priced += 1,
                Err(e) => tracing::warn!(seat = %seat, error = %e, "Recompute failed"),
            }
        }
        Ok(priced)
    }

    pub async fn recompute_all(&self) -> usize {
        let mut priced = 0;
        for event_seating_id in self.profiles.event_ids().await {
            match self.recompute_event(event_seating_id).await {
                Ok(count) => priced += count,
                Err(e) => tracing::error!(event_seating_id, error = %e, "Event recompute failed"),
            }
        }
        priced
    }

    async fn context(&self, seat: &SeatKey, profile: &EventPricingProfile) -> PricingContext {
        let now = self.clock.now();
        let demand = self.demand.snapshot(seat.event_seating_id, now).await;
        PricingContext {
            base_price_cents: profile.base_price_for(&seat.seat_uid),
            capacity: profile.capacity,
            sold: demand.sold,
            held: demand.held,
            sales_last_hour: demand.sales_last_hour,
            event_starts_at: profile.event_starts_at,
            now,
            bounds: profile.bounds(),
        }
    }
}
