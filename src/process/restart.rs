use crate::error::{Result, TetherError};
use std::time::{Duration, SystemTime};

/// Pure exponential backoff calculation
///
/// Delays are computed in whole milliseconds, rounded to the nearest one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    factor: f64,
}

impl BackoffPolicy {
    /// Create a new backoff policy
    ///
    /// # Arguments
    /// * `initial` - Delay used for the first retry and after every reset
    /// * `max` - Upper bound for any computed delay
    /// * `factor` - Growth factor applied on each consecutive failure
    ///
    /// # Returns
    /// * `Ok(BackoffPolicy)` - Valid policy
    /// * `Err(TetherError)` - `initial` is zero, `max < initial`, or the factor is unusable
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Result<Self> {
        if initial.is_zero() {
            return Err(TetherError::ConfigValidationError(
                "initial backoff delay must be greater than zero".to_string(),
            ));
        }

        if max < initial {
            return Err(TetherError::ConfigValidationError(format!(
                "max backoff delay ({:?}) must not be smaller than initial delay ({:?})",
                max, initial
            )));
        }

        if !factor.is_finite() || factor <= 0.0 {
            return Err(TetherError::ConfigValidationError(format!(
                "backoff factor must be a positive number, got {}",
                factor
            )));
        }

        Ok(Self {
            initial,
            max,
            factor,
        })
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Delay that follows `current`: `min(current * factor, max)`, clamped to `initial` from below
    pub fn next_delay(&self, current: Duration) -> Duration {
        let grown = (current.as_millis() as f64 * self.factor).round();
        let max_ms = self.max.as_millis() as f64;
        let next = Duration::from_millis(grown.min(max_ms) as u64);
        next.clamp(self.initial, self.max)
    }

    pub fn reset(&self) -> Duration {
        self.initial
    }
}

/// Backoff policy plus the delay that will be used for the next restart
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    backoff: BackoffPolicy,
    current: Duration,
}

impl RestartPolicy {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            current: backoff.reset(),
            backoff,
        }
    }

    /// Return the delay to wait now and advance to the next one
    pub fn schedule(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.backoff.next_delay(delay);
        delay
    }

    /// Delay the next restart would use
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.backoff.reset();
    }
}

/// Tracks restart history for the supervised process
///
/// The counter is never cleared while the supervisor lives.
#[derive(Debug, Clone, Default)]
pub struct RestartTracker {
    count: u64,
    last_restart: Option<SystemTime>,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_restart(&mut self) {
        self.count += 1;
        self.last_restart = Some(SystemTime::now());
    }

    pub fn restart_count(&self) -> u64 {
        self.count
    }

    pub fn last_restart_time(&self) -> Option<SystemTime> {
        self.last_restart
    }
}
