pub mod admin_auth;
pub mod rate_limit;

pub use admin_auth::admin_auth_middleware;
pub use rate_limit::{rate_limit_middleware, RateBucket};
