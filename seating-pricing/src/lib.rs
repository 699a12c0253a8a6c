pub mod context;
pub mod demand;
pub mod engine;
pub mod profiles;
pub mod service;
pub mod strategy;

pub use context::{PriceBounds, PricingContext};
pub use demand::{DemandSnapshot, DemandTracker};
pub use engine::{DynamicPricingEngine, PricingEngineConfig, PricingState};
pub use profiles::{EventPricingProfile, PricingProfiles};
pub use service::PricingService;
pub use strategy::{
    Adjustment, CustomRuleStrategy, OccupancyTier, PricingRule, PricingStrategy, RuleCondition,
    Strategy, StrategyError, StrategySet, ThresholdStrategy, TimeBasedStrategy, VelocityStrategy,
};
