use axum::{
    extract::{ConnectInfo, Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use seating_store::{app_config::RateLimits, keys};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::AppError;
use crate::session::ClientSession;
use crate::state::AppState;

const WINDOW: Duration = Duration::from_secs(60);

/// Per-operation request budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateBucket {
    Hold,
    Confirm,
    Release,
    Query,
}

impl RateBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateBucket::Hold => "hold",
            RateBucket::Confirm => "confirm",
            RateBucket::Release => "release",
            RateBucket::Query => "query",
        }
    }

    pub fn limit(&self, limits: &RateLimits) -> u32 {
        match self {
            RateBucket::Hold => limits.hold_per_minute,
            RateBucket::Confirm => limits.confirm_per_minute,
            RateBucket::Release => limits.release_per_minute,
            RateBucket::Query => limits.query_per_minute,
        }
    }

    /// Bucket for a public route, `None` for unmetered ones (the event stream).
    pub fn classify(method: &Method, path: &str) -> Option<Self> {
        match (method, path) {
            (&Method::POST, "/v1/seats/hold") => Some(RateBucket::Hold),
            (&Method::DELETE, "/v1/seats/hold") => Some(RateBucket::Release),
            (&Method::POST, "/v1/seats/confirm") => Some(RateBucket::Confirm),
            (&Method::GET, "/v1/seats/holds") => Some(RateBucket::Query),
            (&Method::GET, p) if p.starts_with("/v1/events/") && p.contains("/seats/") => Some(RateBucket::Query),
            _ => None,
        }
    }
}

/// Fixed-window limit keyed by session, or by client address for requests
/// that arrived without a session. Fails open when the counter store errors.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(bucket) = RateBucket::classify(req.method(), req.uri().path()) else {
        return Ok(next.run(req).await);
    };

    let identifier = match req.extensions().get::<ClientSession>() {
        Some(session) if !session.minted => session.id.to_string(),
        _ => req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    };

    let key = keys::rate_limit(&state.settings.key_prefix, bucket.as_str(), &identifier);
    let limit = bucket.limit(&state.settings.rate_limits);

    match state.rate_limiter.hit(&key, limit, WINDOW).await {
        Ok(true) => Ok(next.run(req).await),
        Ok(false) => {
            tracing::debug!(bucket = bucket.as_str(), identifier = %identifier, "Rate limit exceeded");
            Err(AppError::RateLimited)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Rate limiter unavailable, allowing request");
            Ok(next.run(req).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_routes() {
        assert_eq!(RateBucket::classify(&Method::POST, "/v1/seats/hold"), Some(RateBucket::Hold));
        assert_eq!(RateBucket::classify(&Method::DELETE, "/v1/seats/hold"), Some(RateBucket::Release));
        assert_eq!(RateBucket::classify(&Method::POST, "/v1/seats/confirm"), Some(RateBucket::Confirm));
        assert_eq!(
            RateBucket::classify(&Method::GET, "/v1/events/4/seats/A1/price"),
            Some(RateBucket::Query)
        );
        assert_eq!(RateBucket::classify(&Method::GET, "/v1/events/4/stream"), None);
    }

    #[test]
    fn test_default_limits() {
        let limits = RateLimits::default();
        assert_eq!(RateBucket::Hold.limit(&limits), 30);
        assert_eq!(RateBucket::Confirm.limit(&limits), 10);
        assert_eq!(RateBucket::Query.limit(&limits), 120);
    }
}
