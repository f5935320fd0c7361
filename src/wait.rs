//! Retry policy for automation steps run against a fixture page.
//!
//! A step that fails with an assertion error or a stale element reference is
//! retried every `check_every` until `timeout` has passed. The timeout is
//! counted from the first failure, not from the first attempt: a slow check
//! may report on a state of the page older than the moment it returns.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};

use crate::config::FixtureConfig;
use crate::dom::DomError;
use crate::mutator::MutatorError;
use crate::scheduler::ManualScheduler;

/// Failure of an automation step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error(transparent)]
    Mutator(#[from] MutatorError),
}

impl StepError {
    pub fn assertion(message: impl Into<String>) -> Self {
        StepError::Assertion(message.into())
    }

    /// Assertion failures and stale references are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            StepError::Assertion(_) => true,
            StepError::Dom(err) => *err == DomError::StaleElementReference,
            StepError::Mutator(err) => err.is_stale_reference(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub check_every: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            check_every: Duration::from_millis(200),
        }
    }
}

impl WaitOptions {
    pub fn new(timeout: Duration, check_every: Duration) -> Self {
        Self {
            timeout,
            check_every,
        }
    }

    pub fn from_config(config: &FixtureConfig) -> Self {
        Self::new(config.wait_timeout(), config.wait_check_every())
    }

    // A zero interval would spin without ever letting a paused clock move.
    fn interval(&self) -> Duration {
        self.check_every.max(Duration::from_millis(1))
    }
}

/// Run `check` until it succeeds, retrying on the tokio clock.
pub async fn wait_for<T, F>(options: WaitOptions, mut check: F) -> Result<T, StepError>
where
    F: FnMut() -> Result<T, StepError>,
{
    let mut first_failure: Option<Instant> = None;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match check() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                let started = *first_failure.get_or_insert_with(Instant::now);
                if started.elapsed() >= options.timeout {
                    log::debug!(target: "fixture_page::wait", "giving up after {attempts} attempts: {err}");
                    return Err(err);
                }
                sleep(options.interval()).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Run `check` until it succeeds, advancing `scheduler` between attempts.
///
/// Timers that fall due while waiting fire as the clock moves, which is how a
/// delayed element "appears" under virtual time.
pub fn wait_for_manual<T, F>(
    scheduler: &ManualScheduler,
    options: WaitOptions,
    mut check: F,
) -> Result<T, StepError>
where
    F: FnMut() -> Result<T, StepError>,
{
    let timeout_ms = u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX);
    let interval_ms = u64::try_from(options.interval().as_millis()).unwrap_or(u64::MAX);
    let mut first_failure: Option<u64> = None;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match check() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                let started = *first_failure.get_or_insert_with(|| scheduler.now_ms());
                if scheduler.now_ms() - started >= timeout_ms {
                    log::debug!(target: "fixture_page::wait", "giving up after {attempts} attempts: {err}");
                    return Err(err);
                }
                scheduler.advance_time(interval_ms);
            }
            Err(err) => return Err(err),
        }
    }
}
