//! Polling cadence and deadlines for blocking task calls.

use squad_core::{Result, SquadError, TaskDefaults};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between store re-reads while waiting.
///
/// Zero or unset falls back to the default; anything below the floor is raised to it.
pub fn resolve_poll_interval(millis: Option<u64>) -> Duration {
    match millis {
        None | Some(0) => DEFAULT_POLL_INTERVAL,
        Some(ms) => Duration::from_millis(ms).max(MIN_POLL_INTERVAL),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    /// `None` waits until the condition holds or the task disappears
    pub timeout: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

impl WaitOptions {
    pub fn new(poll_interval_ms: Option<u64>, timeout: Option<Duration>) -> Self {
        Self {
            poll_interval: resolve_poll_interval(poll_interval_ms),
            timeout,
        }
    }

    pub fn from_defaults(defaults: &TaskDefaults) -> Self {
        Self::new(
            Some(defaults.poll_interval_ms),
            defaults.wait_timeout_secs.map(Duration::from_secs),
        )
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Wall-clock budget of one wait call.
#[derive(Debug)]
pub(crate) struct Deadline {
    started: Instant,
    options: WaitOptions,
}

impl Deadline {
    pub(crate) fn start(options: &WaitOptions) -> Self {
        Self {
            started: Instant::now(),
            options: *options,
        }
    }

    /// Sleep one poll interval, or fail with `WAIT_TIMEOUT` once the budget is spent.
    ///
    /// The last sleep is shortened so the caller re-checks right at the deadline.
    pub(crate) async fn pause(&self, task_id: &str) -> Result<()> {
        let elapsed = self.started.elapsed();
        let nap = match self.options.timeout {
            Some(timeout) if elapsed >= timeout => {
                return Err(SquadError::WaitTimeout {
                    task_id: task_id.to_string(),
                    waited_ms: elapsed.as_millis(),
                });
            }
            Some(timeout) => self.options.poll_interval.min(timeout - elapsed),
            None => self.options.poll_interval,
        };
        debug!("Waiting {:?} before re-checking {}", nap, task_id);
        tokio::time::sleep(nap).await;
        Ok(())
    }
}
