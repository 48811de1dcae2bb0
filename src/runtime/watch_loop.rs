//! # Watch Loop
//!
//! Runs a reconciliation on a fixed interval until cancelled.
//!
//! A run that fails as a whole (unreadable source, store listing unavailable)
//! is retried on a Fibonacci backoff instead of the interval; the backoff
//! resets after the next run that starts. Invalid options end the loop since
//! they cannot fix themselves.

use crate::config::ReconcileOptions;
use crate::constants::{WATCH_BACKOFF_MAX_SECS, WATCH_BACKOFF_MIN_SECS};
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::reconciler::{ReconcileError, Reconciler};
use crate::server::ServerState;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct WatchLoop {
    reconciler: Reconciler,
    root: PathBuf,
    options: ReconcileOptions,
    interval: Duration,
    backoff: FibonacciBackoff,
}

impl WatchLoop {
    #[must_use]
    pub fn new(
        reconciler: Reconciler,
        root: impl Into<PathBuf>,
        options: ReconcileOptions,
        interval: Duration,
    ) -> Self {
        Self {
            reconciler,
            root: root.into(),
            options,
            interval,
            backoff: FibonacciBackoff::new(WATCH_BACKOFF_MIN_SECS, WATCH_BACKOFF_MAX_SECS),
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: FibonacciBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Reconcile until `cancel` fires
    ///
    /// `ready` turns true after the first run that starts and false again on
    /// shutdown. Returns the number of runs that started.
    ///
    /// # Errors
    /// Returns [`ReconcileError::Config`] when the options are invalid.
    pub async fn run(
        &mut self,
        ready: &ServerState,
        cancel: &CancellationToken,
    ) -> Result<u64, ReconcileError> {
        let mut runs = 0;
        info!(
            "Watching {} every {:?}",
            self.root.display(),
            self.interval
        );

        while !cancel.is_cancelled() {
            let delay = match self
                .reconciler
                .reconcile(&self.root, &self.options, cancel)
                .await
            {
                Ok(result) => {
                    runs += 1;
                    self.backoff.reset();
                    ready.set_ready(true);
                    if !result.is_clean() {
                        warn!(
                            "Run {} finished degraded with {} failed items",
                            result.run_id, result.summary.failed
                        );
                    }
                    self.interval
                }
                Err(ReconcileError::Config(e)) => {
                    ready.set_ready(false);
                    return Err(ReconcileError::Config(e));
                }
                Err(e) => {
                    let delay = self.backoff.next_backoff();
                    error!("Reconciliation failed, retrying in {:?}: {}", delay, e);
                    delay
                }
            };

            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {}
            }
        }

        ready.set_ready(false);
        info!("Watch loop stopped after {} runs", runs);
        Ok(runs)
    }
}
