//! Global request throttling using a token bucket

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use medesk_common::errors::AppError;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter shared by every route
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Limiter plus the configured rate reported back on rejection
#[derive(Clone)]
pub struct Throttle {
    limiter: Arc<GlobalRateLimiter>,
    per_second: u32,
}

/// Build the limiter; a zero burst falls back to the rate
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Result<Throttle, AppError> {
    let rate = NonZeroU32::new(requests_per_second).ok_or_else(|| AppError::Configuration {
        message: "rate_limit.requests_per_second must be greater than zero".to_string(),
    })?;
    let burst = NonZeroU32::new(burst).unwrap_or(rate);

    let quota = Quota::per_second(rate).allow_burst(burst);
    Ok(Throttle {
        limiter: Arc::new(RateLimiter::direct(quota)),
        per_second: requests_per_second,
    })
}

pub async fn rate_limit_middleware(
    State(throttle): State<Throttle>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match throttle.limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
            Err(AppError::RateLimited {
                limit: throttle.per_second,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = create_rate_limiter(100, 200).unwrap();
        assert!(limiter.limiter.check().is_ok());
        assert_eq!(limiter.per_second, 100);
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(create_rate_limiter(0, 10).is_err());
    }

    #[test]
    fn test_burst_exhaustion() {
        let limiter = create_rate_limiter(1, 2).unwrap();
        assert!(limiter.limiter.check().is_ok());
        assert!(limiter.limiter.check().is_ok());
        assert!(limiter.limiter.check().is_err());
    }
}
