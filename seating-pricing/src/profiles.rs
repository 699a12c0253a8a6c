use chrono::{DateTime, Utc};
use seating_core::{PricingStrategyKind, SeatingError, SeatingResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::context::PriceBounds;
use crate::strategy::{Strategy, StrategySet};

/// Pricing inputs an operator registers for one seating map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPricingProfile {
    pub base_price_cents: i64,
    pub capacity: u32,
    #[serde(default)]
    pub event_starts_at: Option<DateTime<Utc>>,
    /// Falls back to the service default when unset
    #[serde(default)]
    pub strategy: Option<PricingStrategyKind>,
    #[serde(default)]
    pub floor_cents: Option<i64>,
    #[serde(default)]
    pub ceiling_cents: Option<i64>,
    /// Per-seat base prices (premium rows, boxes)
    #[serde(default)]
    pub seat_prices: HashMap<String, i64>,
    #[serde(default)]
    pub strategies: StrategySet,
}

impl EventPricingProfile {
    pub fn new(base_price_cents: i64, capacity: u32) -> Self {
        Self {
            base_price_cents,
            capacity,
            event_starts_at: None,
            strategy: None,
            floor_cents: None,
            ceiling_cents: None,
            seat_prices: HashMap::new(),
            strategies: StrategySet::default(),
        }
    }

    pub fn validate(&self) -> SeatingResult<()> {
        if self.base_price_cents <= 0 {
            return Err(SeatingError::Validation("base_price_cents must be positive".into()));
        }
        if self.capacity == 0 {
            return Err(SeatingError::Validation("capacity must be positive".into()));
        }
        if let Some((uid, _)) = self.seat_prices.iter().find(|(_, price)| **price <= 0) {
            return Err(SeatingError::Validation(format!("seat price for {} must be positive", uid)));
        }
        match (self.floor_cents, self.ceiling_cents) {
            (Some(floor), _) if floor < 0 => {
                Err(SeatingError::Validation("floor_cents must not be negative".into()))
            }
            (Some(floor), Some(ceiling)) if floor > ceiling => {
                Err(SeatingError::Validation("floor_cents exceeds ceiling_cents".into()))
            }
            _ => Ok(()),
        }
    }

    pub fn base_price_for(&self, seat_uid: &str) -> i64 {
        self.seat_prices
            .get(seat_uid)
            .copied()
            .unwrap_or(self.base_price_cents)
    }

    pub fn bounds(&self) -> PriceBounds {
        PriceBounds::new(self.floor_cents, self.ceiling_cents)
    }

    pub fn strategy(&self, default_kind: PricingStrategyKind) -> Strategy {
        self.strategies.resolve(self.strategy.unwrap_or(default_kind))
    }
}

/// Registry of pricing profiles keyed by event seating id.
#[derive(Debug, Default)]
pub struct PricingProfiles {
    profiles: RwLock<HashMap<i64, EventPricingProfile>>,
}

impl PricingProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and stores a profile, returning the one it replaced.
    pub async fn upsert(
        &self,
        event_seating_id: i64,
        profile: EventPricingProfile,
    ) -> SeatingResult<Option<EventPricingProfile>> {
        profile.validate()?;
        tracing::info!(
            event_seating_id,
            base_price_cents = profile.base_price_cents,
            strategy = profile.strategy.map(|k| k.as_str()),
            "Pricing profile registered"
        );
        Ok(self.profiles.write().await.insert(event_seating_id, profile))
    }

    pub async fn get(&self, event_seating_id: i64) -> Option<EventPricingProfile> {
        self.profiles.read().await.get(&event_seating_id).cloned()
    }

    pub async fn remove(&self, event_seating_id: i64) -> Option<EventPricingProfile> {
        self.profiles.write().await.remove(&event_seating_id)
    }

    pub async fn event_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.profiles.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::PricingStrategy;

    #[tokio::test]
    async fn test_upsert_validates() {
        let profiles = PricingProfiles::new();
        assert!(profiles.upsert(1, EventPricingProfile::new(0, 10)).await.is_err());

        let mut bad_bounds = EventPricingProfile::new(5_000, 10);
        bad_bounds.floor_cents = Some(9_000);
        bad_bounds.ceiling_cents = Some(8_000);
        assert!(profiles.upsert(1, bad_bounds).await.is_err());

        let replaced = profiles.upsert(1, EventPricingProfile::new(5_000, 10)).await.unwrap();
        assert!(replaced.is_none());
        assert_eq!(profiles.event_ids().await, vec![1]);
    }

    #[test]
    fn test_seat_price_and_strategy_selection() {
        let mut profile = EventPricingProfile::new(5_000, 100);
        profile.seat_prices.insert("BOX1".into(), 20_000);

        assert_eq!(profile.base_price_for("BOX1"), 20_000);
        assert_eq!(profile.base_price_for("A1"), 5_000);
        assert_eq!(profile.strategy(PricingStrategyKind::Threshold).kind(), PricingStrategyKind::Threshold);

        profile.strategy = Some(PricingStrategyKind::Velocity);
        assert_eq!(profile.strategy(PricingStrategyKind::Threshold).kind(), PricingStrategyKind::Velocity);
    }

    #[test]
    fn test_profile_from_json() {
        let profile: EventPricingProfile = serde_json::from_value(serde_json::json!({
            "base_price_cents": 7500,
            "capacity": 250,
            "strategy": "custom",
            "ceiling_cents": 20000,
            "strategies": {
                "custom": {
                    "rules": [{
                        "name": "last call",
                        "type": "time_based",
                        "within_hours": 6,
                        "adjustment_type": "fixed",
                        "adjustment_value": -1000
                    }]
                }
            }
        }))
        .unwrap();

        assert_eq!(profile.strategy, Some(PricingStrategyKind::Custom));
        assert_eq!(profile.strategies.custom.rules.len(), 1);
        assert_eq!(profile.bounds(), PriceBounds::new(None, Some(20_000)));
        assert!(profile.validate().is_ok());
    }
}
