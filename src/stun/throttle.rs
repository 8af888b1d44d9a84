//! Per-server sliding-window request limiter.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{RtcError, RtcResult};

pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request to `key`, failing once `limit` requests fall inside the window.
    pub fn check(&self, key: &str) -> RtcResult<()> {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RtcResult<()> {
        let mut hits = self.hits.lock();
        let entry = hits.entry(key.to_string()).or_default();

        while let Some(&oldest) = entry.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() >= self.limit {
            tracing::debug!("STUN rate limit hit for {} ({} in window)", key, entry.len());
            return Err(RtcError::RateLimited(key.to_string()));
        }
        entry.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixtieth_allowed_sixty_first_rejected() {
        let limiter = RateLimiter::new(60, Duration::from_secs(60));
        let start = Instant::now();
        for i in 0..60 {
            let at = start + Duration::from_millis(i * 100);
            assert!(limiter.check_at("stun.example.org:3478", at).is_ok(), "request {}", i + 1);
        }
        let err = limiter
            .check_at("stun.example.org:3478", start + Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, RtcError::RateLimited(_)));
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        limiter.check_at("a", start).unwrap();
        limiter.check_at("a", start + Duration::from_secs(30)).unwrap();
        assert!(limiter.check_at("a", start + Duration::from_secs(59)).is_err());
        // The first hit has aged out.
        assert!(limiter.check_at("a", start + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        limiter.check_at("a:1", now).unwrap();
        assert!(limiter.check_at("a:1", now).is_err());
        assert!(limiter.check_at("b:1", now).is_ok());
    }
}
