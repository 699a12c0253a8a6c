pub mod app_config;
pub mod events;
pub mod keys;
pub mod memory;
pub mod redis_repo;

pub use app_config::{Config, StoreBackend, TenantOverrides};
pub use events::{BroadcastEventSink, FanoutSink, KafkaEventSink};
pub use memory::{MemoryHoldStore, MemoryRateLimiter};
pub use redis_repo::{RedisHoldStore, RedisRateLimiter};
