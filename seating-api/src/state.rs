use chrono::Duration;
use std::sync::Arc;

use seating_core::{Clock, EventSink, HoldStore, RateLimitStore, SystemClock};
use seating_hold::{HoldConfig, HoldManager};
use seating_pricing::{
    DemandTracker, DynamicPricingEngine, PriceBounds, PricingEngineConfig, PricingProfiles, PricingService,
};
use seating_shared::Masked;
use seating_store::app_config::{Config, RateLimits, StoreBackend};
use seating_store::{
    BroadcastEventSink, FanoutSink, KafkaEventSink, MemoryHoldStore, MemoryRateLimiter, RedisHoldStore,
    RedisRateLimiter,
};

/// Request-path settings resolved once at startup.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub session_cookie: String,
    pub session_header: String,
    pub session_ttl: Duration,
    pub rate_limits: RateLimits,
    pub key_prefix: String,
    pub admin_token: Option<Masked<String>>,
    pub store_backend: StoreBackend,
}

impl ApiSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            session_cookie: config.seating.session_cookie.clone(),
            session_header: config.seating.session_header.clone(),
            session_ttl: config.seating.session_ttl(),
            rate_limits: config.rate_limits.clone(),
            key_prefix: config.store.key_prefix.clone(),
            admin_token: config.admin.token.clone(),
            store_backend: config.store.backend,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub holds: Arc<HoldManager>,
    pub pricing: PricingService,
    pub rate_limiter: Arc<dyn RateLimitStore>,
    pub sse: BroadcastEventSink,
    pub settings: Arc<ApiSettings>,
}

impl AppState {
    /// Connects the configured backends.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let (store, rate_limiter): (Arc<dyn HoldStore>, Arc<dyn RateLimitStore>) = match config.store.backend {
            StoreBackend::Redis => {
                let store = RedisHoldStore::connect(&config.store.redis_url, &config.store.key_prefix).await?;
                let limiter = RedisRateLimiter::new(store.connection());
                (Arc::new(store), Arc::new(limiter))
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-process hold store, holds are not shared across instances");
                (Arc::new(MemoryHoldStore::new()), Arc::new(MemoryRateLimiter::new()))
            }
        };

        let broker: Option<Arc<dyn EventSink>> = match &config.kafka.brokers {
            Some(brokers) => {
                tracing::info!(brokers = %brokers, "Publishing seating events to Kafka");
                Some(Arc::new(KafkaEventSink::new(brokers)?))
            }
            None => None,
        };

        Ok(Self::assemble(config, store, rate_limiter, Arc::new(SystemClock), broker))
    }

    /// Wires managers and event sinks around the given backends.
    pub fn assemble(
        config: &Config,
        store: Arc<dyn HoldStore>,
        rate_limiter: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        broker: Option<Arc<dyn EventSink>>,
    ) -> Self {
        let sse = BroadcastEventSink::new(1024);
        let demand = Arc::new(DemandTracker::new());

        let mut fanout = FanoutSink::new()
            .with(Arc::new(sse.clone()))
            .with(demand.clone());
        if let Some(broker) = broker {
            fanout = fanout.with(broker);
        }
        let events: Arc<dyn EventSink> = Arc::new(fanout);

        let holds = Arc::new(HoldManager::new(store, clock.clone(), events.clone(), hold_config(config)));
        let engine = Arc::new(DynamicPricingEngine::new(pricing_config(config), clock.clone(), events));
        let pricing = PricingService::new(
            engine,
            Arc::new(PricingProfiles::new()),
            demand,
            clock,
            config.dynamic_pricing.default_strategy,
        );

        Self {
            holds,
            pricing,
            rate_limiter,
            sse,
            settings: Arc::new(ApiSettings::from_config(config)),
        }
    }

    /// Single-process state on the in-memory store.
    pub fn in_memory(config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self::assemble(
            config,
            Arc::new(MemoryHoldStore::new()),
            Arc::new(MemoryRateLimiter::new()),
            clock,
            None,
        )
    }
}

pub fn hold_config(config: &Config) -> HoldConfig {
    HoldConfig {
        hold_ttl: config.seating.hold_ttl(),
        max_held_seats_per_session: config.seating.max_held_seats_per_session,
        session_ttl: config.seating.session_ttl(),
        max_batch_size: config.seating.max_batch_size,
    }
}

pub fn pricing_config(config: &Config) -> PricingEngineConfig {
    let dp = &config.dynamic_pricing;
    PricingEngineConfig {
        enabled: dp.enabled,
        cooldown: Duration::seconds(dp.cooldown_seconds as i64),
        cache_ttl: Duration::seconds(dp.cache_ttl_seconds as i64),
        max_change_percent: dp.max_change_percent,
        enforce_bounds: dp.enforce_bounds,
        bounds: PriceBounds::new(dp.floor_cents, dp.ceiling_cents),
        retry_count: config.concurrency.retry_count,
        retry_delay: config.concurrency.retry_delay(),
        ..PricingEngineConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seating_store::app_config::TenantOverrides;

    #[test]
    fn test_tenant_overrides_reach_managers() {
        let overrides = TenantOverrides::from_json(&serde_json::json!({
            "hold_ttl_seconds": 300,
            "max_change_percent": 20.0,
            "floor_cents": 1500
        }))
        .unwrap();
        let config = Config::default().with_overrides(&overrides).unwrap();

        let holds = hold_config(&config);
        assert_eq!(holds.hold_ttl, Duration::seconds(300));
        assert_eq!(holds.session_ttl, Duration::seconds(600));
        assert_eq!(holds.max_batch_size, 10);

        let pricing = pricing_config(&config);
        assert_eq!(pricing.max_change_percent, 20.0);
        assert_eq!(pricing.bounds.floor_cents, Some(1500));
        assert_eq!(pricing.cooldown, Duration::seconds(120));
    }
}
