//! Eventual condition polling
//!
//! Every higher-level wait in the harness goes through [`wait`]: run a probe
//! now, then every interval, until it succeeds or the budget is spent. Probe
//! errors mean "not yet"; on timeout the last one is surfaced so the failure
//! explains itself. [`hold`] is the dual: the probe must keep succeeding for
//! the whole window.

use crate::config::TimingConfig;
use crate::error::{Error, ProbeAction, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Timeout and interval for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub interval: Duration,
    /// End the wait early on errors that cannot heal by retrying
    pub abort_on_fatal: bool,
}

impl WaitPolicy {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            abort_on_fatal: false,
        }
    }

    pub fn with_abort_on_fatal(mut self, abort: bool) -> Self {
        self.abort_on_fatal = abort;
        self
    }
}

impl From<&TimingConfig> for WaitPolicy {
    fn from(timing: &TimingConfig) -> Self {
        WaitPolicy::new(timing.wait_timeout(), timing.poll_interval())
            .with_abort_on_fatal(timing.abort_on_fatal)
    }
}

/// Stand-in deadline for windows too large to add to the clock
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

fn deadline_after(start: Instant, window: Duration) -> Instant {
    start
        .checked_add(window)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// Poll `probe` until it succeeds or `policy.timeout` elapses.
///
/// The probe always runs at least once, even with a zero timeout. On timeout
/// the returned `Error::TimeoutExceeded` carries the last probe error.
pub async fn wait<F, Fut, T>(policy: &WaitPolicy, what: &str, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let deadline = deadline_after(started, policy.timeout);
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let err = match probe().await {
            Ok(value) => {
                debug!(
                    what = %what,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Condition met"
                );
                return Ok(value);
            }
            Err(e) => e,
        };

        if policy.abort_on_fatal && err.action() == ProbeAction::Abort {
            debug!(what = %what, attempts, error = %err, "Aborting wait on fatal probe error");
            return Err(err);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::TimeoutExceeded {
                what: what.to_string(),
                timeout: policy.timeout,
                attempts,
                last_error: Box::new(err),
            });
        }

        trace!(what = %what, attempts, error = %err, "Condition not met yet");
        tokio::time::sleep(policy.interval.min(deadline - now)).await;
    }
}

/// Require `probe` to keep succeeding for `window`, checking every `interval`.
///
/// Returns the first probe error, wrapped as an assertion failure naming the
/// condition that stopped holding.
pub async fn hold<F, Fut>(window: Duration, interval: Duration, what: &str, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let deadline = deadline_after(Instant::now(), window);
    let mut checks = 0u32;

    loop {
        checks += 1;
        if let Err(e) = probe().await {
            return Err(Error::AssertionFailed(format!(
                "{} stopped holding after {} checks: {}",
                what, checks, e
            )));
        }

        let now = Instant::now();
        if now >= deadline {
            debug!(what = %what, checks, "Condition held for the whole window");
            return Ok(());
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(timeout_ms: u64, interval_ms: u64) -> WaitPolicy {
        WaitPolicy::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(interval_ms),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_immediately_without_sleeping() {
        let started = Instant::now();
        let result = wait(&policy(10_000, 5_000), "ready", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = wait(&policy(10_000, 100), "third time", move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::NotConverged("not yet".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_surfaces_last_error() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<()> = wait(&policy(1_000, 300), "claim bound", move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move { Err(Error::NotConverged(format!("attempt {}", n))) }
        })
        .await;

        let attempts = count.load(Ordering::SeqCst);
        assert_matches!(
            result,
            Err(Error::TimeoutExceeded { last_error, attempts: a, .. }) => {
                assert_eq!(a, attempts);
                assert_eq!(last_error.to_string(), format!("Not converged: attempt {}", attempts - 1));
            }
        );
        // t=0, 300, 600, 900, 1000
        assert_eq!(attempts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_probes_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<()> = wait(&policy(0, 100), "anything", move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::NotConverged("no".into())) }
        })
        .await;

        assert_matches!(result, Err(Error::TimeoutExceeded { attempts: 1, .. }));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let ok = wait(&policy(0, 100), "anything", || async { Ok(()) }).await;
        assert!(ok.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_errors_retried_by_default() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<()> = wait(&policy(500, 100), "decode", move || {
            c.fetch_add(1, Ordering::SeqCst);
            async {
                Err(Error::MalformedResponse {
                    what: "lvs".into(),
                    reason: "garbage".into(),
                })
            }
        })
        .await;

        assert_matches!(result, Err(Error::TimeoutExceeded { .. }));
        assert!(count.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_on_fatal_ends_wait() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let policy = policy(10_000, 100).with_abort_on_fatal(true);

        let result: Result<()> = wait(&policy, "decode", move || {
            c.fetch_add(1, Ordering::SeqCst);
            async {
                Err(Error::MalformedResponse {
                    what: "lvs".into(),
                    reason: "garbage".into(),
                })
            }
        })
        .await;

        assert_matches!(result, Err(Error::MalformedResponse { .. }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_passes_when_probe_keeps_succeeding() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        hold(Duration::from_millis(1_000), Duration::from_millis(250), "pending", move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await
        .unwrap();

        // t=0, 250, 500, 750, 1000
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_fails_on_first_error() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = hold(Duration::from_secs(10), Duration::from_millis(100), "pending", move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 2 {
                    Err(Error::NotConverged("bound".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_matches!(result, Err(Error::AssertionFailed(msg)) => {
            assert!(msg.contains("after 3 checks"));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_window_does_not_overflow() {
        let forever = WaitPolicy::new(Duration::MAX, Duration::from_millis(100));
        let result = wait(&forever, "ready", || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);

        let result = hold(Duration::MAX, Duration::from_millis(100), "pending", || async {
            Err(Error::NotConverged("bound".into()))
        })
        .await;
        assert_matches!(result, Err(Error::AssertionFailed(_)));

        let start = Instant::now();
        assert!(deadline_after(start, Duration::MAX) > start);
    }
}
