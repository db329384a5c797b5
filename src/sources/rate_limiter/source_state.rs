//! Per-source rate limiting state.

use std::time::Duration;

use tokio::time::Instant;

use super::RateLimitConfig;

/// State for a single source.
#[derive(Debug, Clone)]
pub struct SourceState {
    /// Spacing settings for this source.
    pub config: RateLimitConfig,
    /// Current floor of the spacing; equals `config.min_delay` unless backing off.
    pub current_delay: Duration,
    /// Earliest time the next request may start.
    pub next_slot: Option<Instant>,
    /// Consecutive successes since the last backoff step.
    pub consecutive_successes: u32,
    /// Whether currently in backoff.
    pub in_backoff: bool,
    /// Total requests made.
    pub total_requests: u64,
    /// Total rate limit hits.
    pub rate_limit_hits: u64,
}

impl SourceState {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            current_delay: config.min_delay,
            config,
            next_slot: None,
            consecutive_successes: 0,
            in_backoff: false,
            total_requests: 0,
            rate_limit_hits: 0,
        }
    }

    /// Replace the spacing settings, keeping counters.
    pub fn reconfigure(&mut self, config: RateLimitConfig) {
        if !self.in_backoff || self.current_delay < config.min_delay {
            self.current_delay = config.min_delay;
        }
        self.config = config;
    }

    /// Spacing to leave after a request starting now: the current floor plus
    /// jitter across the configured min..max spread.
    pub fn next_spacing(&self, jitter_seed: u64) -> Duration {
        let spread = self.config.max_delay.saturating_sub(self.config.min_delay);
        let spread_nanos = spread.as_nanos() as u64;
        let jitter = if spread_nanos == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(jitter_seed % (spread_nanos + 1))
        };
        self.current_delay + jitter
    }

    /// Reserve the next request slot at or after `now`.
    ///
    /// Returns the instant the caller may start its request.
    pub fn reserve(&mut self, now: Instant, jitter_seed: u64) -> Instant {
        let start = match self.next_slot {
            Some(next) if next > now => next,
            _ => now,
        };
        self.next_slot = Some(start + self.next_spacing(jitter_seed));
        self.total_requests += 1;
        start
    }

    /// Multiply the current delay (at least `backoff_base`), capped at the
    /// backoff ceiling.
    pub fn back_off(&mut self, multiplier: f64) {
        let from = self.current_delay.max(self.config.backoff_base);
        let new_delay = Duration::from_secs_f64(from.as_secs_f64() * multiplier);
        self.current_delay = new_delay.min(self.config.max_backoff);
        self.in_backoff = true;
        self.consecutive_successes = 0;
    }

    /// Count a success; after enough of them, step the delay back down.
    ///
    /// Returns true when the source has fully recovered.
    pub fn record_success(&mut self) -> bool {
        self.consecutive_successes += 1;
        if !self.in_backoff || self.consecutive_successes < self.config.recovery_threshold {
            return false;
        }

        self.consecutive_successes = 0;
        let new_delay = Duration::from_secs_f64(
            self.current_delay.as_secs_f64() * self.config.recovery_multiplier,
        );
        if new_delay <= self.config.min_delay.max(self.config.backoff_base) {
            self.current_delay = self.config.min_delay;
            self.in_backoff = false;
            true
        } else {
            self.current_delay = new_delay;
            false
        }
    }

    /// Time until this source is ready for another request.
    pub fn time_until_ready(&self) -> Duration {
        match self.next_slot {
            Some(next) => next.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_ms: u64, max_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            min_delay: Duration::from_millis(min_ms),
            max_delay: Duration::from_millis(max_ms),
            ..Default::default()
        }
    }

    #[test]
    fn test_source_state_new() {
        let state = SourceState::new(config(100, 300));
        assert_eq!(state.current_delay, Duration::from_millis(100));
        assert!(state.next_slot.is_none());
        assert!(!state.in_backoff);
        assert_eq!(state.total_requests, 0);
    }

    #[test]
    fn test_spacing_stays_within_range() {
        let state = SourceState::new(config(100, 300));
        for seed in [0, 1, 7_919, u64::MAX, 200_000_000, 123_456_789_012] {
            let spacing = state.next_spacing(seed);
            assert!(spacing >= Duration::from_millis(100));
            assert!(spacing <= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_spaces_consecutive_slots() {
        let mut state = SourceState::new(config(100, 100));
        let now = Instant::now();
        let first = state.reserve(now, 0);
        let second = state.reserve(now, 0);
        let third = state.reserve(now, 0);

        assert_eq!(first, now);
        assert_eq!(second - first, Duration::from_millis(100));
        assert_eq!(third - second, Duration::from_millis(100));
        assert_eq!(state.total_requests, 3);
    }

    #[test]
    fn test_back_off_is_capped() {
        let mut state = SourceState::new(RateLimitConfig {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
            max_backoff: Duration::from_secs(3),
            ..Default::default()
        });
        state.back_off(2.0);
        assert_eq!(state.current_delay, Duration::from_secs(2));
        state.back_off(2.0);
        assert_eq!(state.current_delay, Duration::from_secs(3));
        assert!(state.in_backoff);
    }

    #[test]
    fn test_back_off_from_zero_floor() {
        let mut state = SourceState::new(RateLimitConfig {
            min_delay: Duration::ZERO,
            max_delay: Duration::from_secs(2),
            backoff_base: Duration::from_millis(500),
            max_backoff: Duration::from_secs(3),
            ..Default::default()
        });
        assert_eq!(state.current_delay, Duration::ZERO);

        state.back_off(2.0);
        assert_eq!(state.current_delay, Duration::from_secs(1));
        state.back_off(2.0);
        assert_eq!(state.current_delay, Duration::from_secs(2));
        state.back_off(2.0);
        assert_eq!(state.current_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_recovery_returns_to_zero_floor() {
        let mut state = SourceState::new(RateLimitConfig {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_base: Duration::from_millis(500),
            recovery_threshold: 1,
            recovery_multiplier: 0.5,
            ..Default::default()
        });
        state.back_off(2.0);
        assert_eq!(state.current_delay, Duration::from_secs(1));

        assert!(state.record_success());
        assert!(!state.in_backoff);
        assert_eq!(state.current_delay, Duration::ZERO);
    }

    #[test]
    fn test_recovery_after_threshold_successes() {
        let mut state = SourceState::new(RateLimitConfig {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(100),
            backoff_base: Duration::from_millis(100),
            recovery_threshold: 2,
            recovery_multiplier: 0.5,
            ..Default::default()
        });
        state.back_off(2.0);
        assert_eq!(state.current_delay, Duration::from_millis(200));

        assert!(!state.record_success());
        assert!(state.record_success());
        assert!(!state.in_backoff);
        assert_eq!(state.current_delay, Duration::from_millis(100));
    }
}
