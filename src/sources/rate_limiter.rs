//! Adaptive per-source rate limiter.
//!
//! Spacing between requests is a property of the source, not of the worker:
//! `acquire` reserves the next slot under the write lock, so any number of
//! concurrent workers still start requests at least `min_delay` apart.
//! Backs off on 429/503, gradually recovers on success.

mod source_state;

pub use source_state::SourceState;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::SourceRateLimit;

/// Configuration for rate limiting behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Minimum spacing between requests (floor).
    pub min_delay: Duration,
    /// Upper end of the jittered spacing when not backing off.
    pub max_delay: Duration,
    /// Ceiling for backoff.
    pub max_backoff: Duration,
    /// Smallest delay backoff multiplies from, so a source with no spacing
    /// of its own still slows down when it pushes back.
    pub backoff_base: Duration,
    /// Multiplier for exponential backoff on rate limit.
    pub backoff_multiplier: f64,
    /// Multiplier for server errors other than 503.
    pub server_error_multiplier: f64,
    /// Multiplier for recovery on success (< 1.0 to decrease delay).
    pub recovery_multiplier: f64,
    /// Number of consecutive successes before reducing delay.
    pub recovery_threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(3_000),
            max_backoff: Duration::from_secs(60),
            backoff_base: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            server_error_multiplier: 1.5,
            recovery_multiplier: 0.8,
            recovery_threshold: 5,
        }
    }
}

impl From<SourceRateLimit> for RateLimitConfig {
    fn from(limit: SourceRateLimit) -> Self {
        let min_delay = Duration::from_millis(limit.min_delay_ms);
        let max_delay = Duration::from_millis(limit.max_delay_ms).max(min_delay);
        let defaults = Self::default();
        Self {
            min_delay,
            max_delay,
            max_backoff: defaults.max_backoff.max(max_delay),
            ..defaults
        }
    }
}

/// Pseudo-random jitter seed from the clock's sub-second nanos.
fn jitter_seed() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0)
}

/// Adaptive rate limiter that tracks per-source request timing.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    default_config: RateLimitConfig,
    sources: Arc<RwLock<HashMap<String, SourceState>>>,
}

impl RateLimiter {
    /// Create a new rate limiter with default config.
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    /// Create a rate limiter whose unconfigured sources use `config`.
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            default_config: config,
            sources: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Set the spacing for one source.
    pub async fn configure(&self, source: &str, config: RateLimitConfig) {
        let mut sources = self.sources.write().await;
        match sources.get_mut(source) {
            Some(state) => state.reconfigure(config),
            None => {
                sources.insert(source.to_string(), SourceState::new(config));
            }
        }
    }

    /// Wait for this source's next slot. Returns how long the caller waited.
    pub async fn acquire(&self, source: &str) -> Duration {
        let start = {
            let mut sources = self.sources.write().await;
            let state = sources
                .entry(source.to_string())
                .or_insert_with(|| SourceState::new(self.default_config.clone()));
            state.reserve(Instant::now(), jitter_seed())
        };

        let wait = start.saturating_duration_since(Instant::now());
        if wait > Duration::ZERO {
            debug!("Rate limiting {}: waiting {:?}", source, wait);
            tokio::time::sleep_until(start).await;
        }
        wait
    }

    /// Check if a status code is definitely a rate limit.
    pub fn is_definite_rate_limit(status_code: u16) -> bool {
        matches!(status_code, 429 | 503)
    }

    /// Feed a response status back into the source's delay.
    pub async fn report_status(&self, source: &str, status_code: u16) {
        match status_code {
            s if Self::is_definite_rate_limit(s) => self.report_rate_limit(source, s).await,
            500..=599 => self.report_server_error(source).await,
            400..=499 => self.report_client_error(source).await,
            _ => self.report_success(source).await,
        }
    }

    /// Report a successful request - may decrease delay.
    pub async fn report_success(&self, source: &str) {
        let mut sources = self.sources.write().await;
        if let Some(state) = sources.get_mut(source) {
            let was_backing_off = state.in_backoff;
            if state.record_success() {
                info!("Source {} recovered from rate limit backoff", source);
            } else if was_backing_off && state.consecutive_successes == 0 {
                debug!("Source {} delay reduced to {:?}", source, state.current_delay);
            }
        }
    }

    /// Report a definite rate limit hit (429 or 503) - increases delay.
    pub async fn report_rate_limit(&self, source: &str, status_code: u16) {
        let mut sources = self.sources.write().await;
        if let Some(state) = sources.get_mut(source) {
            state.rate_limit_hits += 1;
            let multiplier = state.config.backoff_multiplier;
            state.back_off(multiplier);
            warn!(
                "Rate limited by {} (HTTP {}), backing off to {:?}",
                source, status_code, state.current_delay
            );
        }
    }

    /// Report a client error (4xx other than 429) - no delay change.
    pub async fn report_client_error(&self, source: &str) {
        let sources = self.sources.read().await;
        if let Some(state) = sources.get(source) {
            debug!(
                "Client error for {}, delay unchanged at {:?}",
                source, state.current_delay
            );
        }
    }

    /// Report a server error (5xx other than 503) - mild backoff.
    pub async fn report_server_error(&self, source: &str) {
        let mut sources = self.sources.write().await;
        if let Some(state) = sources.get_mut(source) {
            let multiplier = state.config.server_error_multiplier;
            state.back_off(multiplier);
            debug!(
                "Server error for {}, delay increased to {:?}",
                source, state.current_delay
            );
        }
    }

    /// Get time until a source is ready.
    pub async fn time_until_ready(&self, source: &str) -> Duration {
        let sources = self.sources.read().await;
        sources
            .get(source)
            .map(|s| s.time_until_ready())
            .unwrap_or(Duration::ZERO)
    }

    /// Get statistics for all sources.
    pub async fn stats(&self) -> HashMap<String, SourceStats> {
        let sources = self.sources.read().await;
        sources
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    SourceStats {
                        current_delay: v.current_delay,
                        in_backoff: v.in_backoff,
                        total_requests: v.total_requests,
                        rate_limit_hits: v.rate_limit_hits,
                    },
                )
            })
            .collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for a source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStats {
    pub current_delay: Duration,
    pub in_backoff: bool,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
}
