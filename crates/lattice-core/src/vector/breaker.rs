//! HNSW circuit breaker
//!
//! Per-index health tracker deciding whether a query should attempt the
//! HNSW graph or go straight to the flat scan. States:
//! - `Healthy`: use the graph
//! - `Failed`: skip the graph until `retry_delay` has elapsed
//! - `Retrying`: one probe in flight; success closes the breaker,
//!   failure re-opens it
//!
//! After `max_retries` failed probe cycles the breaker stays open for
//! good; the index keeps serving through flat scans.

use std::time::{Duration, Instant};
use tracing::debug;

/// Breaker health state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Graph attempts allowed
    Healthy,
    /// Graph attempts suppressed until the retry delay elapses
    Failed,
    /// A probe attempt is allowed through
    Retrying,
}

/// Breaker tuning
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker. Defaults to one:
    /// an unbuilt graph fails deterministically on every attempt.
    pub failure_threshold: u32,
    /// How long to stay open before allowing a probe
    pub retry_delay: Duration,
    /// Failed probe cycles before giving up on the graph entirely
    pub max_retries: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 1,
            retry_delay: Duration::from_secs(30),
            max_retries: 5,
        }
    }
}

/// Per-index circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    retry_count: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    /// New breaker in the healthy state
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Healthy,
            consecutive_failures: 0,
            retry_count: 0,
            last_failure: None,
        }
    }

    /// Current state
    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// A graph search completed successfully
    pub fn record_success(&mut self) {
        self.state = BreakerState::Healthy;
        self.consecutive_failures = 0;
        self.retry_count = 0;
        self.last_failure = None;
    }

    /// A graph search failed
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.state == BreakerState::Retrying {
            self.retry_count += 1;
        }
        if self.consecutive_failures >= self.config.failure_threshold {
            if self.state != BreakerState::Failed {
                debug!(
                    failures = self.consecutive_failures,
                    "circuit breaker opened, vector queries fall back to flat scan"
                );
            }
            self.state = BreakerState::Failed;
            self.last_failure = Some(Instant::now());
        }
    }

    /// Whether the next query may attempt the HNSW graph. Transitions
    /// `Failed -> Retrying` once the retry delay has elapsed.
    pub fn should_use_hnsw(&mut self) -> bool {
        match self.state {
            BreakerState::Healthy | BreakerState::Retrying => true,
            BreakerState::Failed => {
                if self.retry_count >= self.config.max_retries {
                    return false;
                }
                let elapsed = self
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.retry_delay {
                    debug!("circuit breaker probing HNSW graph again");
                    self.state = BreakerState::Retrying;
                    true
                } else {
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, delay_ms: u64) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            retry_delay: Duration::from_millis(delay_ms),
            max_retries: 3,
        }
    }

    #[test]
    fn test_starts_healthy() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        assert_eq!(breaker.state(), BreakerState::Healthy);
        assert!(breaker.should_use_hnsw());
    }

    #[test]
    fn test_opens_after_threshold() {
        let mut breaker = CircuitBreaker::new(config(3, 10_000));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Healthy);
        assert!(breaker.should_use_hnsw());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Failed);
        assert!(!breaker.should_use_hnsw());
    }

    #[test]
    fn test_success_resets() {
        let mut breaker = CircuitBreaker::new(config(2, 10_000));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Failed);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Healthy);
        assert!(breaker.should_use_hnsw());
    }

    #[test]
    fn test_retries_after_delay() {
        let mut breaker = CircuitBreaker::new(config(1, 0));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Failed);
        // zero delay: probe allowed immediately
        assert!(breaker.should_use_hnsw());
        assert_eq!(breaker.state(), BreakerState::Retrying);
    }

    #[test]
    fn test_stays_open_within_delay() {
        let mut breaker = CircuitBreaker::new(config(1, 60_000));
        breaker.record_failure();
        assert!(!breaker.should_use_hnsw());
        assert!(!breaker.should_use_hnsw());
        assert_eq!(breaker.state(), BreakerState::Failed);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let mut breaker = CircuitBreaker::new(config(1, 0));
        for _ in 0..3 {
            breaker.record_failure();
            assert!(breaker.should_use_hnsw(), "probe should be allowed");
            // probe fails again
        }
        breaker.record_failure();
        assert!(!breaker.should_use_hnsw(), "breaker should be permanently open");
    }
}
