//! Polling with exponential backoff.
//!
//! Used to wait for a freshly booted cluster to become observably ready
//! before anything is read from it.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::core::CancelHandle;

/// Granularity at which a sleeping retry notices cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// How long to wait for an operation which fails until some external system
/// has converged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Readiness {
    /// Maximum number of attempts, `0` disables the wait altogether.
    pub attempts: u32,
    /// Delay after the first failed attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound of the delay between attempts, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth of the delay after every failed attempt. Values below `1.0`
    /// are treated as `1.0`.
    pub multiplier: f64,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            attempts: 30,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl Readiness {
    /// Do not wait, assume the system is ready.
    pub fn skip() -> Self {
        Self {
            attempts: 0,
            ..Default::default()
        }
    }

    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.attempts == 0
    }

    fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        Duration::try_from_secs_f64(delay.as_secs_f64() * multiplier)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay())
    }
}

/// Why [`retry_with_backoff`] gave up.
#[derive(Debug, PartialEq)]
pub(crate) enum RetryError<E> {
    /// The run was cancelled after `attempts` attempts.
    Cancelled { attempts: u32 },
    Exhausted { attempts: u32, error: E },
}

/// Sleeps for `duration` unless cancelled first. Returns `false` on
/// cancellation.
fn sleep_unless_cancelled(duration: Duration, cancel: &CancelHandle) -> bool {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return false;
        }
        let step = remaining.min(CANCEL_POLL);
        thread::sleep(step);
        remaining -= step;
    }
    !cancel.is_cancelled()
}

/// Runs `operation` until it succeeds or the attempts are exhausted, sleeping
/// between attempts. Cancellation is checked before every attempt and during
/// every sleep.
pub(crate) fn retry_with_backoff<T, E>(
    config: &Readiness,
    operation_name: &str,
    cancel: &CancelHandle,
    mut operation: impl FnMut() -> Result<T, E>,
) -> Result<T, RetryError<E>>
where
    E: Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay();

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }

        attempt += 1;

        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= config.attempts.max(1) {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        error: e,
                    });
                }

                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                if !sleep_unless_cancelled(delay, cancel) {
                    warn!(operation = %operation_name, attempt, "Operation cancelled");
                    return Err(RetryError::Cancelled { attempts: attempt });
                }

                delay = config.next_delay(delay);
            }
        }
    }
}
