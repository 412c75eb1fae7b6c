//! Dual per-minute/per-hour token-bucket rate limiting (SPEC_FULL.md §4.8).
//! Grounded on the teacher's `DashMap<IpAddr, Bucket>` fractional-refill
//! bucket, extended to two independent ceilings enforced in parallel.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Instant,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::state::AppState;

#[derive(Debug, Clone)]
struct Bucket {
    last_refill: Instant,
    tokens: f64,
    fill_rate: f64,
    capacity: f64,
}

impl Bucket {
    fn new(capacity: f64, fill_rate: f64) -> Self {
        Self { last_refill: Instant::now(), tokens: capacity, fill_rate, capacity }
    }

    /// Returns `Ok(())` if a token was consumed, else `Err(retry_after_secs)`.
    fn check(&mut self) -> Result<(), f64> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let refilled = (self.tokens + elapsed * self.fill_rate).min(self.capacity);

        if refilled < 1.0 {
            let retry_after = (1.0 - refilled) / self.fill_rate;
            return Err(retry_after.ceil());
        }

        self.last_refill = now;
        self.tokens = refilled - 1.0;
        Ok(())
    }
}

struct DualBucket {
    per_minute: Bucket,
    per_hour: Bucket,
}

pub struct RateLimiter {
    per_minute_limit: u32,
    per_hour_limit: u32,
    buckets: DashMap<IpAddr, DualBucket>,
}

impl RateLimiter {
    pub fn new(per_minute_limit: u32, per_hour_limit: u32) -> Self {
        Self { per_minute_limit, per_hour_limit, buckets: DashMap::new() }
    }

    /// Check both ceilings; the tighter one determines the retry-after value.
    pub fn check(&self, ip: IpAddr) -> Result<(), f64> {
        let mut entry = self.buckets.entry(ip).or_insert_with(|| DualBucket {
            per_minute: Bucket::new(self.per_minute_limit as f64, self.per_minute_limit as f64 / 60.0),
            per_hour: Bucket::new(self.per_hour_limit as f64, self.per_hour_limit as f64 / 3600.0),
        });

        let minute_result = entry.per_minute.check();
        let hour_result = entry.per_hour.check();

        match (minute_result, hour_result) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(a), Ok(())) => Err(a),
            (Ok(()), Err(b)) => Err(b),
            (Err(a), Err(b)) => Err(a.max(b)),
        }
    }
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let limiter = &state.rate_limiter;
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip())
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));

    if let Err(retry_after) = limiter.check(ip) {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            [("retry-after", retry_after.to_string())],
            "rate limit exceeded",
        )
            .into_response());
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(a: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, a))
    }

    #[test]
    fn per_minute_ceiling_is_enforced() {
        let limiter = RateLimiter::new(2, 1000);
        let addr = ip(1);
        assert!(limiter.check(addr).is_ok());
        assert!(limiter.check(addr).is_ok());
        assert!(limiter.check(addr).is_err());
    }

    #[test]
    fn per_hour_ceiling_can_bind_tighter_than_per_minute() {
        let limiter = RateLimiter::new(1000, 1);
        let addr = ip(2);
        assert!(limiter.check(addr).is_ok());
        assert!(limiter.check(addr).is_err());
    }

    #[test]
    fn independent_ip_buckets() {
        let limiter = RateLimiter::new(1, 1000);
        assert!(limiter.check(ip(10)).is_ok());
        assert!(limiter.check(ip(10)).is_err());
        assert!(limiter.check(ip(11)).is_ok());
    }
}
