//! Backoff Poller.
//!
//! A generic bounded wait: call a [`Probe`] repeatedly, sleeping for an
//! exponentially growing interval between checks, until the probe reports
//! done, reports a fatal error, the time budget runs out, or the pass is
//! cancelled. The poller performs no I/O of its own.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::cancel::Cancellation;
use crate::config::duration_ms;

/// Timing of a poll loop. Stateless and shared by every resource kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    #[serde(with = "duration_ms", rename = "initial_interval_ms")]
    pub initial_interval: Duration,
    /// Growth factor applied to the interval after every round.
    pub multiplier: f64,
    #[serde(with = "duration_ms", rename = "max_interval_ms")]
    pub max_interval: Duration,
    #[serde(with = "duration_ms", rename = "max_elapsed_ms")]
    pub max_elapsed: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(5),
            multiplier: 1.5,
            max_interval: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(30 * 60),
        }
    }
}

impl PollPolicy {
    /// Same policy with a different time budget.
    pub fn with_max_elapsed(&self, max_elapsed: Duration) -> Self {
        Self {
            max_elapsed,
            ..self.clone()
        }
    }

    /// The sequence of sleep intervals this policy produces.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self)
    }
}

/// Interval sequence: starts at `initial_interval`, multiplied each round,
/// capped at `max_interval`. Never decreases.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    multiplier: f64,
    max: Duration,
}

impl Backoff {
    pub fn new(policy: &PollPolicy) -> Self {
        let max = policy.max_interval.max(policy.initial_interval);
        Self {
            next: policy.initial_interval,
            multiplier: if policy.multiplier.is_finite() {
                policy.multiplier.max(1.0)
            } else {
                1.0
            },
            max,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max)
            .min(self.max);
        Some(current)
    }
}

/// Result of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick<T> {
    /// Terminal success; polling stops.
    Ready(T),
    /// Not there yet; sleep and check again.
    Pending,
}

/// Something the poller can check repeatedly.
///
/// `Err` from [`Probe::check`] is fatal: polling stops immediately and the
/// error is handed back unchanged.
#[async_trait]
pub trait Probe: Send {
    type Output: Send;
    type Error: Send;

    async fn check(&mut self) -> Result<Tick<Self::Output>, Self::Error>;
}

/// Adapts a closure returning a future into a [`Probe`].
pub struct FnProbe<F>(pub F);

#[async_trait]
impl<F, Fut, T, E> Probe for FnProbe<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Tick<T>, E>> + Send,
    T: Send,
    E: Send,
{
    type Output = T;
    type Error = E;

    async fn check(&mut self) -> Result<Tick<T>, E> {
        (self.0)().await
    }
}

/// Why polling stopped without reaching a terminal success.
#[derive(Debug, Error)]
pub enum PollError<E> {
    /// The probe reported an unrecoverable failure.
    #[error("{0}")]
    Fatal(E),

    /// The time budget was exhausted before the probe reported done.
    #[error("gave up after {}s and {attempts} checks", .elapsed.as_secs())]
    Timeout { elapsed: Duration, attempts: u32 },

    /// The pass was cancelled.
    #[error("cancelled after {attempts} checks")]
    Cancelled { attempts: u32 },
}

impl<E> PollError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::Timeout { .. })
    }
}

/// Poll `probe` until it is done, fails, times out or is cancelled.
///
/// The first check happens immediately. Between checks the poller sleeps for
/// the next [`Backoff`] interval, clamped so the total never runs past
/// `max_elapsed`.
pub async fn poll<P: Probe>(
    policy: &PollPolicy,
    cancel: &Cancellation,
    probe: &mut P,
) -> Result<P::Output, PollError<P::Error>> {
    let start = Instant::now();
    let mut intervals = policy.backoff();
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled { attempts });
        }

        attempts += 1;
        match probe.check().await {
            Ok(Tick::Ready(value)) => {
                debug!(
                    attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Poll reached terminal state"
                );
                return Ok(value);
            }
            Ok(Tick::Pending) => {}
            Err(e) => return Err(PollError::Fatal(e)),
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.max_elapsed {
            return Err(PollError::Timeout { elapsed, attempts });
        }

        let interval = intervals
            .next()
            .unwrap_or(policy.max_interval)
            .min(policy.max_elapsed - elapsed);
        trace!(attempts, interval_ms = interval.as_millis() as u64, "Waiting before next check");

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => return Err(PollError::Cancelled { attempts }),
        }
    }
}
