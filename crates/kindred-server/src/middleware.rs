//! Request middleware: identity extraction and fixed-window rate limiting.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::AppState;

/// The authenticated user id for this request, inserted by
/// [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct UserContext(pub String);

/// Extracts the caller's identity from `X-Kindred-User` or a bearer token.
///
/// Session verification happens at the edge gateway; by the time a request
/// reaches the relay the forwarded token payload is the user id itself.
/// Requests presenting no identity at all are rejected before any handler
/// runs.
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let user_id = if let Some(value) = req.headers().get("X-Kindred-User") {
        value
            .to_str()
            .map_err(|_| StatusCode::UNAUTHORIZED)?
            .to_string()
    } else if let Some(value) = req.headers().get("Authorization") {
        let value = value.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
        match value.strip_prefix("Bearer ") {
            Some(token) => token.to_string(),
            None => return Err(StatusCode::UNAUTHORIZED),
        }
    } else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    if user_id.trim().is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    req.extensions_mut().insert(UserContext(user_id));
    Ok(next.run(req).await)
}

const RATE_WINDOW_SECS: u64 = 60;
const MAX_TRACKED_KEYS: usize = 10_000;

/// What a client is counted under: the authenticated user when available,
/// otherwise the remote address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    User(String),
    Ip(IpAddr),
}

/// Fixed-window request counter.
///
/// Counts reset when a window expires rather than sliding, so a client can
/// burst up to twice its limit across a window boundary.
#[derive(Clone, Default)]
pub struct RateLimiter {
    hits: Arc<Mutex<HashMap<RateLimitKey, (u32, Instant)>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one request against `key`. Returns false when the key is over
    /// its budget for the current window.
    pub fn check(&self, key: RateLimitKey, limit: u32) -> bool {
        let mut hits = match self.hits.lock() {
            Ok(guard) => guard,
            // A panicked holder leaves the counts intact; keep serving.
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = Instant::now();

        // Shed expired windows once the table gets large, so one-off
        // clients do not accumulate forever.
        if hits.len() > MAX_TRACKED_KEYS {
            hits.retain(|_, (_, start)| now.duration_since(*start).as_secs() < RATE_WINDOW_SECS);
        }

        let entry = hits.entry(key).or_insert((0, now));
        if now.duration_since(entry.1).as_secs() >= RATE_WINDOW_SECS {
            *entry = (0, now);
        }
        entry.0 += 1;
        entry.0 <= limit
    }
}

/// Applies per-client rate limits before handlers run.
///
/// Voice turns fan out to paid upstream services, so `/api/voice/` paths
/// get a much tighter budget than the rest of the API. Auth runs further
/// in, so keys here are usually the remote address.
pub async fn rate_limit_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let state = match req.extensions().get::<Arc<AppState>>() {
        Some(state) => state.clone(),
        None => {
            tracing::error!("rate limit middleware running without app state");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let key = if let Some(UserContext(user_id)) = req.extensions().get::<UserContext>() {
        RateLimitKey::User(user_id.clone())
    } else if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        RateLimitKey::Ip(addr.ip())
    } else {
        tracing::error!("rate limit middleware found neither identity nor remote address");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    };

    let limit = if req.uri().path().starts_with("/api/voice/") {
        state.policy.rate_limit.voice_limit
    } else {
        state.policy.rate_limit.default_limit
    };

    if !state.rate_limiter.check(key, limit) {
        let response = (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", "60")],
            "rate limit exceeded",
        )
            .into_response();
        return Ok(response);
    }

    Ok(next.run(req).await)
}
