use serde::Deserialize;
use seating_core::PricingStrategyKind;
use seating_shared::Masked;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub kafka: KafkaConfig,
    pub seating: SeatingConfig,
    pub rate_limits: RateLimits,
    pub dynamic_pricing: DynamicPricingConfig,
    pub concurrency: ConcurrencyConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "seating".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka publishing is disabled when no brokers are configured.
    pub brokers: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SeatingConfig {
    pub hold_ttl_seconds: u64,
    pub max_held_seats_per_session: usize,
    pub session_buffer_seconds: u64,
    pub session_cookie: String,
    pub session_header: String,
    pub sweep_interval_seconds: u64,
    /// Largest number of seats accepted in one hold/release/confirm request
    pub max_batch_size: usize,
}

impl Default for SeatingConfig {
    fn default() -> Self {
        Self {
            hold_ttl_seconds: 900,
            max_held_seats_per_session: 10,
            session_buffer_seconds: 300,
            session_cookie: "epas_seating_session".to_string(),
            session_header: "X-Session-Id".to_string(),
            sweep_interval_seconds: 60,
            max_batch_size: 10,
        }
    }
}

impl SeatingConfig {
    pub fn hold_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.hold_ttl_seconds as i64)
    }

    /// Session sets outlive the holds they contain by the configured buffer.
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds((self.hold_ttl_seconds + self.session_buffer_seconds) as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimits {
    pub hold_per_minute: u32,
    pub confirm_per_minute: u32,
    pub release_per_minute: u32,
    pub query_per_minute: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            hold_per_minute: 30,
            confirm_per_minute: 10,
            release_per_minute: 30,
            query_per_minute: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DynamicPricingConfig {
    pub enabled: bool,
    pub cooldown_seconds: u64,
    pub max_change_percent: f64,
    pub recompute_interval_minutes: u64,
    pub cache_ttl_seconds: u64,
    pub enforce_bounds: bool,
    pub floor_cents: Option<i64>,
    pub ceiling_cents: Option<i64>,
    pub default_strategy: PricingStrategyKind,
}

impl Default for DynamicPricingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_seconds: 120,
            max_change_percent: 50.0,
            recompute_interval_minutes: 5,
            cache_ttl_seconds: 60,
            enforce_bounds: true,
            floor_cents: None,
            ceiling_cents: None,
            default_strategy: PricingStrategyKind::Threshold,
        }
    }
}

impl DynamicPricingConfig {
    pub fn recompute_interval(&self) -> Duration {
        Duration::from_secs(self.recompute_interval_minutes.max(1) * 60)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay_ms: 100,
        }
    }
}

impl ConcurrencyConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer token for `/v1/admin` routes. Admin routes are closed when unset.
    pub token: Option<Masked<String>>,
}

/// Per-tenant settings stored as a JSON object next to the tenant record.
/// Only the fields present override the service-wide values.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct TenantOverrides {
    pub hold_ttl_seconds: Option<u64>,
    pub max_held_seats_per_session: Option<usize>,
    pub dynamic_pricing_enabled: Option<bool>,
    pub cooldown_seconds: Option<u64>,
    pub max_change_percent: Option<f64>,
    pub floor_cents: Option<i64>,
    pub ceiling_cents: Option<i64>,
    pub default_strategy: Option<PricingStrategyKind>,
}

impl TenantOverrides {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `SEATING__SEATING__HOLD_TTL_SECONDS=600`
            .add_source(config::Environment::with_prefix("SEATING").separator("__"))
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the managers cannot run with.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let dp = &self.dynamic_pricing;
        if dp.max_change_percent.is_nan() || dp.max_change_percent < 0.0 {
            return Err(config::ConfigError::Message(format!(
                "dynamic_pricing.max_change_percent must be >= 0, got {}",
                dp.max_change_percent
            )));
        }
        if let (Some(floor), Some(ceiling)) = (dp.floor_cents, dp.ceiling_cents) {
            if floor > ceiling {
                return Err(config::ConfigError::Message(format!(
                    "dynamic_pricing.floor_cents ({}) exceeds ceiling_cents ({})",
                    floor, ceiling
                )));
            }
        }
        if self.seating.max_batch_size == 0 {
            return Err(config::ConfigError::Message(
                "seating.max_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Resolves the effective configuration for one tenant. The result is
    /// handed to the hold manager and pricing engine at construction time.
    pub fn with_overrides(&self, overrides: &TenantOverrides) -> Result<Self, config::ConfigError> {
        let mut resolved = self.clone();

        if let Some(ttl) = overrides.hold_ttl_seconds {
            resolved.seating.hold_ttl_seconds = ttl;
        }
        if let Some(max) = overrides.max_held_seats_per_session {
            resolved.seating.max_held_seats_per_session = max;
        }
        if let Some(enabled) = overrides.dynamic_pricing_enabled {
            resolved.dynamic_pricing.enabled = enabled;
        }
        if let Some(cooldown) = overrides.cooldown_seconds {
            resolved.dynamic_pricing.cooldown_seconds = cooldown;
        }
        if let Some(pct) = overrides.max_change_percent {
            resolved.dynamic_pricing.max_change_percent = pct;
        }
        if overrides.floor_cents.is_some() {
            resolved.dynamic_pricing.floor_cents = overrides.floor_cents;
        }
        if overrides.ceiling_cents.is_some() {
            resolved.dynamic_pricing.ceiling_cents = overrides.ceiling_cents;
        }
        if let Some(strategy) = overrides.default_strategy {
            resolved.dynamic_pricing.default_strategy = strategy;
        }

        resolved.validate()?;
        Ok(resolved)
    }
}
