use axum::{
    extract::State,
    http::{header, HeaderName, Method},
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod error;
pub mod holds;
pub mod middleware;
pub mod pricing;
pub mod session;
pub mod state;
pub mod stream;
pub mod worker;

pub use state::AppState;

use middleware::rate_limit_middleware;
use session::session_middleware;

pub fn app(state: AppState) -> Router {
    let mut allowed_headers = vec![header::AUTHORIZATION, header::CONTENT_TYPE];
    match HeaderName::try_from(state.settings.session_header.as_str()) {
        Ok(name) => allowed_headers.push(name),
        Err(e) => tracing::warn!(
            header = %state.settings.session_header,
            error = %e,
            "Session header is not a valid header name, leaving it out of CORS"
        ),
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(allowed_headers);

    // Layers run bottom-up: the session is resolved before rate limiting.
    let public = Router::new()
        .merge(holds::routes())
        .merge(pricing::routes())
        .merge(stream::routes())
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(state.clone(), session_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(public)
        .merge(admin::routes(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "store": format!("{:?}", state.settings.store_backend).to_lowercase(),
        "ttl_native": state.holds.ttl_native(),
    }))
}
