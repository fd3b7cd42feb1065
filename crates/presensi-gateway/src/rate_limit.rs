//! Per-client-IP rate limiting (fixed window)

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use presensi_common::config::RateLimitSettings;

use crate::metrics;

struct ClientWindow {
    window_start: Instant,
    count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub tracked_clients: usize,
    pub max_requests: u32,
    pub window_secs: u64,
}

/// Fixed-window request counter per client IP. Cheap to clone.
#[derive(Clone)]
pub struct RateLimiter {
    clients: Arc<DashMap<IpAddr, ClientWindow>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            max_requests: settings.max_requests,
            window: Duration::from_secs(settings.window_secs),
        }
    }

    /// Count one request from `ip`. Returns the seconds to wait when the
    /// client is over its budget.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let now = Instant::now();
        let mut entry = self.clients.entry(ip).or_insert_with(|| ClientWindow {
            window_start: now,
            count: 0,
        });

        if now.duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.count = 0;
        }

        if entry.count >= self.max_requests {
            let elapsed = now.duration_since(entry.window_start);
            let retry_after = self.window.saturating_sub(elapsed).as_secs().max(1);
            metrics::record_rate_limited();
            return Err(retry_after);
        }

        entry.count += 1;
        Ok(())
    }

    /// Drop windows that have fully elapsed
    pub fn prune(&self) {
        let now = Instant::now();
        let before = self.clients.len();
        self.clients
            .retain(|_, w| now.duration_since(w.window_start) < self.window);
        let removed = before.saturating_sub(self.clients.len());
        if removed > 0 {
            debug!(removed, "Pruned expired rate-limit windows");
        }
    }

    /// Prune expired client windows on an interval, forever
    pub async fn run_pruner(self) {
        let interval = self.window.max(Duration::from_secs(10));
        loop {
            tokio::time::sleep(interval).await;
            self.prune();
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            tracked_clients: self.clients.len(),
            max_requests: self.max_requests,
            window_secs: self.window.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitSettings {
            max_requests: max,
            window_secs,
        })
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn test_allows_up_to_limit() {
        let rl = limiter(3, 60);
        assert!(rl.check(ip(1)).is_ok());
        assert!(rl.check(ip(1)).is_ok());
        assert!(rl.check(ip(1)).is_ok());
        let retry = rl.check(ip(1)).unwrap_err();
        assert!(retry >= 1 && retry <= 60);
    }

    #[test]
    fn test_limits_are_per_ip() {
        let rl = limiter(1, 60);
        assert!(rl.check(ip(1)).is_ok());
        assert!(rl.check(ip(2)).is_ok());
        assert!(rl.check(ip(1)).is_err());
        assert!(rl.check(ip(2)).is_err());
    }

    #[test]
    fn test_window_reset() {
        let rl = limiter(1, 1);
        assert!(rl.check(ip(1)).is_ok());
        assert!(rl.check(ip(1)).is_err());
        std::thread::sleep(Duration::from_millis(1100));
        assert!(rl.check(ip(1)).is_ok());
    }

    #[test]
    fn test_prune_drops_expired_windows() {
        let rl = limiter(5, 1);
        rl.check(ip(1)).unwrap();
        rl.check(ip(2)).unwrap();
        assert_eq!(rl.stats().tracked_clients, 2);
        std::thread::sleep(Duration::from_millis(1100));
        rl.prune();
        assert_eq!(rl.stats().tracked_clients, 0);
    }
}
