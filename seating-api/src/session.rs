use axum::{
    extract::{Request, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use seating_core::{SeatingError, SessionId};
use seating_hold::SessionTracker;

use crate::error::AppError;
use crate::state::{ApiSettings, AppState};

/// Session bound to the current request.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSession {
    pub id: SessionId,
    /// True when the client sent no id and one was issued for this request.
    pub minted: bool,
}

/// Resolves the session id: header first, then cookie, else a new one.
pub fn resolve(settings: &ApiSettings, headers: &HeaderMap) -> Result<ClientSession, AppError> {
    if let Some(raw) = headers.get(settings.session_header.as_str()) {
        let raw = raw
            .to_str()
            .map_err(|_| SeatingError::Validation("session header is not valid ASCII".into()))?;
        return Ok(ClientSession {
            id: SessionId::parse(raw)?,
            minted: false,
        });
    }

    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get(&settings.session_cookie) {
        return Ok(ClientSession {
            id: SessionId::parse(cookie.value())?,
            minted: false,
        });
    }

    Ok(ClientSession {
        id: SessionTracker::mint()?,
        minted: true,
    })
}

pub fn session_cookie(settings: &ApiSettings, session: &SessionId) -> Cookie<'static> {
    Cookie::build((settings.session_cookie.clone(), session.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(settings.session_ttl.num_seconds()))
        .build()
}

pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session = resolve(&state.settings, req.headers())?;

    if session.minted {
        if let Err(e) = state.holds.sessions().register(&session.id).await {
            tracing::warn!(error = %e, "Failed to register new session");
        }
    }

    req.extensions_mut().insert(session.clone());
    let mut response = next.run(req).await;

    if session.minted {
        let cookie = session_cookie(&state.settings, &session.id);
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => tracing::error!(error = %e, "Session cookie is not a valid header value"),
        }
    }

    Ok(response)
}
