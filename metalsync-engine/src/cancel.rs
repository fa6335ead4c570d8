//! Cancellation signal for a convergence pass.
//!
//! Built on a `tokio::sync::watch` channel, the same primitive the control
//! plane uses for its shutdown signal, plus an optional deadline.

use std::future::pending;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};

/// Trigger side of a [`Cancellation`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace never fails, even with no receivers left
        self.tx.send_replace(true);
    }
}

/// Signal checked by the poller between rounds.
///
/// Fires when the paired [`CancelHandle`] is triggered or when the deadline
/// passes, whichever comes first.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// Create a manually triggered signal.
    pub fn new() -> (CancelHandle, Cancellation) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle { tx },
            Cancellation {
                rx: Some(rx),
                deadline: None,
            },
        )
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self {
            rx: None,
            deadline: None,
        }
    }

    /// A signal that fires at `deadline`.
    pub fn at_deadline(deadline: Instant) -> Self {
        Self {
            rx: None,
            deadline: Some(deadline),
        }
    }

    /// Add (or tighten) a deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn is_cancelled(&self) -> bool {
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return true;
        }
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the signal fires. Never resolves for [`Cancellation::never`].
    pub async fn cancelled(&self) {
        let flag = async {
            match self.rx.clone() {
                Some(mut rx) => loop {
                    if *rx.borrow_and_update() {
                        return;
                    }
                    if rx.changed().await.is_err() {
                        // handle dropped without cancelling
                        pending::<()>().await;
                    }
                },
                None => pending::<()>().await,
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = flag => {}
                    _ = sleep_until(deadline) => {}
                }
            }
            None => flag.await,
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn test_never_does_not_fire() {
        let cancel = Cancellation::never();
        assert!(!cancel.is_cancelled());
        assert!(
            timeout(Duration::from_secs(3600), cancel.cancelled())
                .await
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_fires() {
        let (handle, cancel) = Cancellation::new();
        assert!(!cancel.is_cancelled());
        handle.cancel();
        assert!(cancel.is_cancelled());
        timeout(Duration::from_millis(1), cancel.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_is_not_cancellation() {
        let (handle, cancel) = Cancellation::new();
        drop(handle);
        assert!(!cancel.is_cancelled());
        assert!(
            timeout(Duration::from_secs(60), cancel.cancelled())
                .await
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires() {
        let cancel = Cancellation::at_deadline(Instant::now() + Duration::from_secs(10));
        assert!(!cancel.is_cancelled());
        cancel.cancelled().await;
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_keeps_earliest() {
        let now = Instant::now();
        let cancel = Cancellation::at_deadline(now + Duration::from_secs(5))
            .with_deadline(now + Duration::from_secs(50));
        assert_eq!(cancel.deadline, Some(now + Duration::from_secs(5)));
    }
}
