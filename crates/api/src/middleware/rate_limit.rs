//! Rate limiting middleware.
//!
//! Per-client rate limiting for the dispatcher trip creation endpoint,
//! keyed by originating IP.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovRateLimiter,
};
use serde_json::json;
use std::{
    collections::HashMap,
    num::NonZeroU32,
    sync::{Arc, RwLock},
};

use crate::app::AppState;

/// Type alias for the rate limiter used per client key.
type ClientRateLimiter = GovRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiter state shared across all requests.
/// Uses a HashMap keyed by client IP with individual rate limiters.
pub struct RateLimiterState {
    limiters: RwLock<HashMap<String, Arc<ClientRateLimiter>>>,
    rate_limit_per_minute: u32,
}

impl RateLimiterState {
    /// Create a new rate limiter state with the specified limit per minute.
    pub fn new(rate_limit_per_minute: u32) -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            rate_limit_per_minute,
        }
    }

    /// Get or create a rate limiter for the given client key.
    fn get_or_create_limiter(&self, key: &str) -> Arc<ClientRateLimiter> {
        {
            let limiters = self.limiters.read().unwrap();
            if let Some(limiter) = limiters.get(key) {
                return limiter.clone();
            }
        }

        let mut limiters = self.limiters.write().unwrap();

        // Double-check in case another thread created it
        if let Some(limiter) = limiters.get(key) {
            return limiter.clone();
        }

        let quota = Quota::per_minute(
            NonZeroU32::new(self.rate_limit_per_minute).unwrap_or(NonZeroU32::new(100).unwrap()),
        );
        let limiter = Arc::new(GovRateLimiter::direct(quota));
        limiters.insert(key.to_string(), limiter.clone());
        limiter
    }

    /// Check if a request from the given client should be allowed.
    /// Returns Ok(()) if allowed, or Err with retry_after seconds.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let limiter = self.get_or_create_limiter(key);

        match limiter.check() {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let wait_time = not_until.wait_time_from(governor::clock::Clock::now(
                    &governor::clock::DefaultClock::default(),
                ));
                Err(wait_time.as_secs().max(1))
            }
        }
    }
}

impl std::fmt::Debug for RateLimiterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterState")
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("active_limiters", &self.limiters.read().unwrap().len())
            .finish()
    }
}

/// Middleware that applies per-IP rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(ref rate_limiter) = state.rate_limiter else {
        return next.run(req).await;
    };

    let client_key = client_key(&req);

    if let Err(retry_after) = rate_limiter.check(&client_key) {
        return rate_limited_response(retry_after);
    }

    next.run(req).await
}

/// Resolve the client key: the first X-Forwarded-For hop when present.
fn client_key(req: &Request<Body>) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "direct".to_string())
}

fn rate_limited_response(retry_after: u64) -> Response {
    let body = Json(json!({
        "error": "rate_limited",
        "message": "Too many requests. Please try again later.",
        "retryAfter": retry_after,
    }));

    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    if let Ok(value) = retry_after.to_string().parse() {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_allows_within_quota() {
        let state = RateLimiterState::new(10);
        for _ in 0..10 {
            assert!(state.check("10.0.0.1").is_ok());
        }
    }

    #[test]
    fn test_limiter_blocks_over_quota() {
        let state = RateLimiterState::new(2);
        assert!(state.check("10.0.0.2").is_ok());
        assert!(state.check("10.0.0.2").is_ok());
        let blocked = state.check("10.0.0.2");
        assert!(blocked.is_err());
        assert!(blocked.unwrap_err() >= 1);
    }

    #[test]
    fn test_limiter_keys_are_independent() {
        let state = RateLimiterState::new(1);
        assert!(state.check("10.0.0.3").is_ok());
        assert!(state.check("10.0.0.4").is_ok());
        assert!(state.check("10.0.0.3").is_err());
    }

    #[test]
    fn test_client_key_from_forwarded_header() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&req), "203.0.113.7");
    }

    #[test]
    fn test_client_key_fallback() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_key(&req), "direct");
    }
}
