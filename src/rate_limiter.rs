//! # Feature: Inbound Rate Limiting
//!
//! Drops message floods with a sliding window per (provider, sender). The same
//! phone number reaching the bot through two providers is limited separately.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 2.0.0: Keyed by messaging provider and sender address; idle entry pruning
//! - 1.0.0: Initial release with per-user sliding window rate limiting

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::core::MessagingProvider;

type RateLimitKey = (MessagingProvider, String);

pub struct RateLimiter {
    requests: DashMap<RateLimitKey, Vec<Instant>>,
    max_requests: usize,
    time_window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, time_window: Duration) -> Self {
        RateLimiter {
            requests: DashMap::new(),
            max_requests,
            time_window,
        }
    }

    /// `max_requests` per minute
    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Record a message from `sender` and report whether it is within the limit.
    /// Rejected messages do not count toward the window.
    pub fn check(&self, provider: MessagingProvider, sender: &str) -> bool {
        let now = Instant::now();
        let mut entry = self
            .requests
            .entry((provider, sender.to_string()))
            .or_default();

        entry.retain(|&time| now.duration_since(time) < self.time_window);

        if entry.len() >= self.max_requests {
            false
        } else {
            entry.push(now);
            true
        }
    }

    /// Forget senders with no requests inside the window; returns how many
    pub fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.requests.len();
        self.requests.retain(|_, times| {
            times.retain(|&time| now.duration_since(time) < self.time_window);
            !times.is_empty()
        });
        before.saturating_sub(self.requests.len())
    }

    pub fn tracked_senders(&self) -> usize {
        self.requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    const PHONE: &str = "+15550001111";

    #[test]
    fn test_allows_under_limit_and_blocks_over() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));

        assert!(limiter.check(MessagingProvider::Meta, PHONE));
        assert!(limiter.check(MessagingProvider::Meta, PHONE));
        assert!(!limiter.check(MessagingProvider::Meta, PHONE));
    }

    #[tokio::test]
    async fn test_resets_after_window() {
        let limiter = RateLimiter::new(1, Duration::from_millis(100));

        assert!(limiter.check(MessagingProvider::Twilio, PHONE));
        assert!(!limiter.check(MessagingProvider::Twilio, PHONE));

        sleep(Duration::from_millis(150)).await;
        assert!(limiter.check(MessagingProvider::Twilio, PHONE));
    }

    #[test]
    fn test_senders_and_providers_are_independent() {
        let limiter = RateLimiter::per_minute(1);

        assert!(limiter.check(MessagingProvider::Meta, PHONE));
        assert!(!limiter.check(MessagingProvider::Meta, PHONE));

        assert!(limiter.check(MessagingProvider::Meta, "+15550002222"));
        assert!(limiter.check(MessagingProvider::Twilio, PHONE));
        assert!(!limiter.check(MessagingProvider::Twilio, PHONE));
    }

    #[tokio::test]
    async fn test_prune_idle() {
        let limiter = RateLimiter::new(5, Duration::from_millis(50));
        limiter.check(MessagingProvider::Console, "a");
        limiter.check(MessagingProvider::Console, "b");
        assert_eq!(limiter.tracked_senders(), 2);

        sleep(Duration::from_millis(80)).await;
        limiter.check(MessagingProvider::Console, "b");

        assert_eq!(limiter.prune_idle(), 1);
        assert_eq!(limiter.tracked_senders(), 1);
    }
}
