use seating_core::PricingStrategyKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::PricingContext;

#[derive(Debug, Error, PartialEq)]
pub enum StrategyError {
    #[error("missing pricing input: {0}")]
    MissingInput(&'static str),

    #[error("invalid strategy configuration: {0}")]
    InvalidConfig(String),

    #[error("strategy produced a non-positive price: {0}")]
    NonPositivePrice(i64),
}

/// A pricing function from context to a raw price in cents.
///
/// Implementations are pure: guards (step clamp, floor, ceiling) are the
/// engine's job.
pub trait PricingStrategy {
    fn kind(&self) -> PricingStrategyKind;

    fn compute(&self, ctx: &PricingContext) -> Result<i64, StrategyError>;
}

fn apply_multiplier(base_price_cents: i64, multiplier: f64) -> Result<i64, StrategyError> {
    if base_price_cents <= 0 {
        return Err(StrategyError::NonPositivePrice(base_price_cents));
    }
    let price = (base_price_cents as f64 * multiplier).round() as i64;
    if price <= 0 {
        return Err(StrategyError::NonPositivePrice(price));
    }
    Ok(price)
}

/// Tiered multiplier on time left before the event starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeBasedStrategy {
    pub last_minute_hours: i64,
    pub last_minute_multiplier: f64,
    pub short_notice_hours: i64,
    pub short_notice_multiplier: f64,
    /// Sales this far out get the early bird rate
    pub early_bird_hours: i64,
    pub early_bird_multiplier: f64,
}

impl Default for TimeBasedStrategy {
    fn default() -> Self {
        Self {
            last_minute_hours: 24,
            last_minute_multiplier: 1.5,
            short_notice_hours: 72,
            short_notice_multiplier: 1.2,
            early_bird_hours: 720, // 30 days
            early_bird_multiplier: 0.9,
        }
    }
}

impl TimeBasedStrategy {
    pub fn multiplier(&self, hours_until_start: i64) -> f64 {
        if hours_until_start < self.last_minute_hours {
            self.last_minute_multiplier
        } else if hours_until_start < self.short_notice_hours {
            self.short_notice_multiplier
        } else if hours_until_start > self.early_bird_hours {
            self.early_bird_multiplier
        } else {
            1.0
        }
    }
}

impl PricingStrategy for TimeBasedStrategy {
    fn kind(&self) -> PricingStrategyKind {
        PricingStrategyKind::TimeBased
    }

    fn compute(&self, ctx: &PricingContext) -> Result<i64, StrategyError> {
        let hours = ctx
            .hours_until_start()
            .ok_or(StrategyError::MissingInput("event_starts_at"))?;
        apply_multiplier(ctx.base_price_cents, self.multiplier(hours))
    }
}

/// Scales price with the recent sales rate against a target rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityStrategy {
    pub target_sales_per_hour: f64,
    pub sensitivity: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
}

impl Default for VelocityStrategy {
    fn default() -> Self {
        Self {
            target_sales_per_hour: 10.0,
            sensitivity: 0.5,
            min_multiplier: 0.8,
            max_multiplier: 2.0,
        }
    }
}

impl PricingStrategy for VelocityStrategy {
    fn kind(&self) -> PricingStrategyKind {
        PricingStrategyKind::Velocity
    }

    fn compute(&self, ctx: &PricingContext) -> Result<i64, StrategyError> {
        if self.target_sales_per_hour <= 0.0 {
            return Err(StrategyError::InvalidConfig(
                "target_sales_per_hour must be positive".into(),
            ));
        }
        if self.min_multiplier > self.max_multiplier {
            return Err(StrategyError::InvalidConfig(
                "min_multiplier exceeds max_multiplier".into(),
            ));
        }

        let ratio = ctx.sales_last_hour as f64 / self.target_sales_per_hour;
        let multiplier = (1.0 + self.sensitivity * (ratio - 1.0))
            .clamp(self.min_multiplier, self.max_multiplier);
        apply_multiplier(ctx.base_price_cents, multiplier)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyTier {
    pub min_occupancy: f64,
    pub multiplier: f64,
}

/// Step multiplier on occupancy: the highest tier reached applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdStrategy {
    pub tiers: Vec<OccupancyTier>,
}

impl Default for ThresholdStrategy {
    fn default() -> Self {
        let tier = |min_occupancy, multiplier| OccupancyTier {
            min_occupancy,
            multiplier,
        };
        Self {
            tiers: vec![tier(0.5, 1.1), tier(0.75, 1.25), tier(0.9, 1.5)],
        }
    }
}

impl ThresholdStrategy {
    pub fn multiplier(&self, occupancy: f64) -> f64 {
        self.tiers
            .iter()
            .filter(|t| occupancy >= t.min_occupancy)
            .max_by(|a, b| a.min_occupancy.total_cmp(&b.min_occupancy))
            .map(|t| t.multiplier)
            .unwrap_or(1.0)
    }
}

impl PricingStrategy for ThresholdStrategy {
    fn kind(&self) -> PricingStrategyKind {
        PricingStrategyKind::Threshold
    }

    fn compute(&self, ctx: &PricingContext) -> Result<i64, StrategyError> {
        if ctx.capacity == 0 {
            return Err(StrategyError::MissingInput("capacity"));
        }
        apply_multiplier(ctx.base_price_cents, self.multiplier(ctx.occupancy()))
    }
}

/// When a custom rule fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Event starts within this many hours.
    TimeBased { within_hours: i64 },
    /// Trailing-hour sales at or above this rate.
    DemandBased { min_sales_per_hour: u32 },
    /// Occupancy at or above this share of capacity.
    InventoryBased { min_occupancy: f64 },
}

impl RuleCondition {
    pub fn matches(&self, ctx: &PricingContext) -> bool {
        match self {
            RuleCondition::TimeBased { within_hours } => ctx
                .hours_until_start()
                .is_some_and(|hours| hours <= *within_hours),
            RuleCondition::DemandBased { min_sales_per_hour } => {
                ctx.sales_last_hour >= *min_sales_per_hour
            }
            RuleCondition::InventoryBased { min_occupancy } => {
                ctx.capacity > 0 && ctx.occupancy() >= *min_occupancy
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "adjustment_type", content = "adjustment_value", rename_all = "snake_case")]
pub enum Adjustment {
    /// Percent change, e.g. `15.0` adds 15%, `-10.0` takes 10% off.
    Percentage(f64),
    /// Fixed change in cents.
    Fixed(i64),
}

impl Adjustment {
    pub fn apply(&self, price_cents: i64) -> i64 {
        match self {
            Adjustment::Percentage(pct) => {
                (price_cents as f64 * (1.0 + pct / 100.0)).round() as i64
            }
            Adjustment::Fixed(delta) => price_cents.saturating_add(*delta),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRule {
    pub name: String,
    #[serde(flatten)]
    pub condition: RuleCondition,
    #[serde(flatten)]
    pub adjustment: Adjustment,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Operator-defined rules applied in ascending priority order, each on top
/// of the previous result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomRuleStrategy {
    pub rules: Vec<PricingRule>,
}

impl CustomRuleStrategy {
    pub fn new(mut rules: Vec<PricingRule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        Self { rules }
    }
}

impl PricingStrategy for CustomRuleStrategy {
    fn kind(&self) -> PricingStrategyKind {
        PricingStrategyKind::Custom
    }

    fn compute(&self, ctx: &PricingContext) -> Result<i64, StrategyError> {
        if ctx.base_price_cents <= 0 {
            return Err(StrategyError::NonPositivePrice(ctx.base_price_cents));
        }

        let mut ordered: Vec<&PricingRule> = self.rules.iter().filter(|r| r.is_active).collect();
        ordered.sort_by_key(|r| r.priority);

        let price = ordered
            .into_iter()
            .filter(|r| r.condition.matches(ctx))
            .fold(ctx.base_price_cents, |price, rule| rule.adjustment.apply(price));

        if price <= 0 {
            return Err(StrategyError::NonPositivePrice(price));
        }
        Ok(price)
    }
}

/// Closed set of strategies the engine can run.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    TimeBased(TimeBasedStrategy),
    Velocity(VelocityStrategy),
    Threshold(ThresholdStrategy),
    Custom(CustomRuleStrategy),
}

impl PricingStrategy for Strategy {
    fn kind(&self) -> PricingStrategyKind {
        match self {
            Strategy::TimeBased(s) => s.kind(),
            Strategy::Velocity(s) => s.kind(),
            Strategy::Threshold(s) => s.kind(),
            Strategy::Custom(s) => s.kind(),
        }
    }

    fn compute(&self, ctx: &PricingContext) -> Result<i64, StrategyError> {
        match self {
            Strategy::TimeBased(s) => s.compute(ctx),
            Strategy::Velocity(s) => s.compute(ctx),
            Strategy::Threshold(s) => s.compute(ctx),
            Strategy::Custom(s) => s.compute(ctx),
        }
    }
}

/// Parameters for every strategy kind; a profile picks one by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySet {
    pub time_based: TimeBasedStrategy,
    pub velocity: VelocityStrategy,
    pub threshold: ThresholdStrategy,
    pub custom: CustomRuleStrategy,
}

impl StrategySet {
    pub fn resolve(&self, kind: PricingStrategyKind) -> Strategy {
        match kind {
            PricingStrategyKind::TimeBased => Strategy::TimeBased(self.time_based.clone()),
            PricingStrategyKind::Velocity => Strategy::Velocity(self.velocity.clone()),
            PricingStrategyKind::Threshold => Strategy::Threshold(self.threshold.clone()),
            PricingStrategyKind::Custom => Strategy::Custom(self.custom.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn ctx() -> PricingContext {
        PricingContext::new(10_000, 100, Utc::now())
    }

    #[test]
    fn test_time_based_tiers() {
        let strategy = TimeBasedStrategy::default();
        let mut c = ctx();

        assert_eq!(strategy.compute(&c), Err(StrategyError::MissingInput("event_starts_at")));

        c.event_starts_at = Some(c.now + Duration::hours(10));
        assert_eq!(strategy.compute(&c).unwrap(), 15_000);

        c.event_starts_at = Some(c.now + Duration::hours(48));
        assert_eq!(strategy.compute(&c).unwrap(), 12_000);

        c.event_starts_at = Some(c.now + Duration::days(10));
        assert_eq!(strategy.compute(&c).unwrap(), 10_000);

        c.event_starts_at = Some(c.now + Duration::days(45));
        assert_eq!(strategy.compute(&c).unwrap(), 9_000);
    }

    #[test]
    fn test_velocity_scales_and_clamps() {
        let strategy = VelocityStrategy::default();
        let mut c = ctx();

        c.sales_last_hour = 10;
        assert_eq!(strategy.compute(&c).unwrap(), 10_000);

        c.sales_last_hour = 20;
        assert_eq!(strategy.compute(&c).unwrap(), 15_000);

        c.sales_last_hour = 500;
        assert_eq!(strategy.compute(&c).unwrap(), 20_000);

        c.sales_last_hour = 0;
        assert_eq!(strategy.compute(&c).unwrap(), 8_000);

        let broken = VelocityStrategy {
            target_sales_per_hour: 0.0,
            ..Default::default()
        };
        assert!(matches!(broken.compute(&c), Err(StrategyError::InvalidConfig(_))));
    }

    #[test]
    fn test_threshold_picks_highest_reached_tier() {
        let strategy = ThresholdStrategy::default();
        let mut c = ctx();

        c.sold = 10;
        assert_eq!(strategy.compute(&c).unwrap(), 10_000);

        c.sold = 60;
        c.held = 20;
        assert_eq!(strategy.compute(&c).unwrap(), 12_500);

        c.sold = 95;
        assert_eq!(strategy.compute(&c).unwrap(), 15_000);

        c.capacity = 0;
        assert_eq!(strategy.compute(&c), Err(StrategyError::MissingInput("capacity")));
    }

    #[test]
    fn test_custom_rules_apply_in_priority_order() {
        let rules = vec![
            PricingRule {
                name: "late flat fee".into(),
                condition: RuleCondition::TimeBased { within_hours: 48 },
                adjustment: Adjustment::Fixed(500),
                priority: 2,
                is_active: true,
            },
            PricingRule {
                name: "busy".into(),
                condition: RuleCondition::InventoryBased { min_occupancy: 0.5 },
                adjustment: Adjustment::Percentage(10.0),
                priority: 1,
                is_active: true,
            },
            PricingRule {
                name: "disabled".into(),
                condition: RuleCondition::DemandBased { min_sales_per_hour: 0 },
                adjustment: Adjustment::Fixed(-9_000),
                priority: 0,
                is_active: false,
            },
        ];
        let strategy = CustomRuleStrategy::new(rules);
        let mut c = ctx();
        c.sold = 60;
        c.event_starts_at = Some(c.now + Duration::hours(12));

        // 10_000 * 1.10, then + 500
        assert_eq!(strategy.compute(&c).unwrap(), 11_500);

        c.event_starts_at = None;
        assert_eq!(strategy.compute(&c).unwrap(), 11_000);
    }

    #[test]
    fn test_custom_rule_rejects_negative_result() {
        let strategy = CustomRuleStrategy::new(vec![PricingRule {
            name: "giveaway".into(),
            condition: RuleCondition::DemandBased { min_sales_per_hour: 0 },
            adjustment: Adjustment::Fixed(-20_000),
            priority: 0,
            is_active: true,
        }]);
        assert_eq!(strategy.compute(&ctx()), Err(StrategyError::NonPositivePrice(-10_000)));
    }

    #[test]
    fn test_rule_wire_format() {
        let json = serde_json::json!({
            "name": "surge",
            "type": "demand_based",
            "min_sales_per_hour": 25,
            "adjustment_type": "percentage",
            "adjustment_value": 12.5,
            "priority": 3
        });
        let rule: PricingRule = serde_json::from_value(json).unwrap();
        assert_eq!(rule.condition, RuleCondition::DemandBased { min_sales_per_hour: 25 });
        assert_eq!(rule.adjustment, Adjustment::Percentage(12.5));
        assert!(rule.is_active);
    }

    #[test]
    fn test_strategy_set_resolves_kind() {
        let set = StrategySet::default();
        for kind in PricingStrategyKind::ALL {
            assert_eq!(set.resolve(kind).kind(), kind);
        }
    }
}
