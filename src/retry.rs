//! Retry with plain exponential backoff.
//!
//! The wait after failed attempt `n` is
//! `min(max_wait, max(min_wait, multiplier * 2^(n-1)))` time units. There is
//! no wait before the first attempt and no jitter. The doubling schedule comes
//! from [`backoff::ExponentialBackoff`] with randomization disabled; the
//! `min_wait` floor is applied on top of it.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;

/// Steps after which the schedule is guaranteed to sit at `max_wait`.
const MAX_SCHEDULE_STEPS: u32 = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Scale of the first wait, in time units.
    pub multiplier: f64,
    /// Lower bound of a single wait, in time units.
    pub min_wait: f64,
    /// Upper bound of a single wait, in time units.
    pub max_wait: f64,
    /// Duration of one time unit.
    pub unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            multiplier: 1.0,
            min_wait: 1.0,
            max_wait: 8.0,
            unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Default policy with a custom time unit.
    pub fn with_unit(unit: Duration) -> Self {
        Self {
            unit,
            ..Self::default()
        }
    }

    fn units(&self, n: f64) -> Duration {
        Duration::try_from_secs_f64(self.unit.as_secs_f64() * n.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Fresh wait schedule for one `run`.
    fn schedule(&self) -> ExponentialBackoff {
        let max_interval = self.units(self.max_wait);
        let initial_interval = self.units(self.multiplier).min(max_interval);
        ExponentialBackoff {
            current_interval: initial_interval,
            initial_interval,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    fn next_wait(&self, schedule: &mut ExponentialBackoff) -> Duration {
        let max_interval = schedule.max_interval;
        let wait = schedule.next_backoff().unwrap_or(max_interval);
        // randomization 0 can still leave sub-microsecond float noise
        let micros = wait.as_micros().min(u64::MAX as u128) as u64;
        Duration::from_micros(micros)
            .max(self.units(self.min_wait))
            .min(max_interval.max(self.units(self.min_wait)))
    }

    /// Wait inserted after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let mut schedule = self.schedule();
        let steps = attempt.clamp(1, MAX_SCHEDULE_STEPS);
        let mut wait = Duration::ZERO;
        for _ in 0..steps {
            wait = self.next_wait(&mut schedule);
        }
        wait
    }

    /// Run `op` until it succeeds, fails with an error `is_retryable` rejects,
    /// or `max_attempts` is used up. The closure receives the 1-based attempt
    /// number. The error of the last attempt is returned unchanged.
    pub async fn run<T, E, F, Fut, P>(&self, is_retryable: P, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut schedule = self.schedule();
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt < self.max_attempts && is_retryable(&err) => {
                    let wait = self.next_wait(&mut schedule);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "retryable failure, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => {
                    if is_retryable(&err) {
                        tracing::error!(attempts = attempt, error = %err, "retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}
