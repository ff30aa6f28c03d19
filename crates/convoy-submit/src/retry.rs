//! Timer and change driven delivery of queued reports.
//!
//! # Design
//! - An attempt probes connectivity, requeues timed-out files and, when online, runs one pass
//!   over the queue.
//! - Attempts never overlap; one requested while another runs is dropped.
//! - The loop runs on a fixed interval and on every new `Queued` file in the reports directory.
//!   If the directory listener dies it is reopened on the next tick.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use convoy_core::{ApiStatus, ChangeEvent, ChangeSource, ChangeSubscription, SubmissionApi};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::queue::TransferState;
use crate::submitter::{PendingPass, ReportSubmitter};

/// Default period between attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Result of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Another attempt was running.
    Busy,
    /// The collector could not be reached; only timeouts were processed.
    Offline {
        /// Files returned to `Queued`.
        rescued: usize,
    },
    /// A pass over the queue ran.
    Completed {
        /// Files returned to `Queued` before the pass.
        rescued: usize,
        /// Pass results.
        pass: PendingPass,
    },
    /// The queue could not be processed.
    Failed,
}

/// Drives eventual delivery of the durable report queue.
pub struct SubmissionRetryLoop {
    submitter: Arc<ReportSubmitter>,
    changes: Arc<dyn ChangeSource>,
    interval: Duration,
    gate: AsyncMutex<()>,
}

impl SubmissionRetryLoop {
    /// Loop over `submitter`'s queue, attempting every `interval`.
    #[must_use]
    pub fn new(
        submitter: Arc<ReportSubmitter>,
        changes: Arc<dyn ChangeSource>,
        interval: Duration,
    ) -> Self {
        Self {
            submitter,
            changes,
            interval,
            gate: AsyncMutex::new(()),
        }
    }

    /// Submitter driven by this loop.
    #[must_use]
    pub const fn submitter(&self) -> &Arc<ReportSubmitter> {
        &self.submitter
    }

    /// Probe, rescue timeouts, and submit when online. Dropped if an attempt is in flight.
    pub async fn attempt(&self) -> AttemptOutcome {
        let Ok(_guard) = self.gate.try_lock() else {
            debug!("submission attempt already running; dropped");
            return AttemptOutcome::Busy;
        };

        let online = self.submitter.ping().await;
        let rescued = self.check_timeouts();
        if !online {
            return AttemptOutcome::Offline { rescued };
        }
        match self.submitter.submit_pending().await {
            Ok(pass) => AttemptOutcome::Completed { rescued, pass },
            Err(err) => {
                warn!(error = %err, "pending report pass failed");
                AttemptOutcome::Failed
            }
        }
    }

    /// Requeue timed-out `Transfering` and `Error` files; returns how many moved.
    pub fn check_timeouts(&self) -> usize {
        match self.submitter.queue().rescue_timeouts(SystemTime::now()) {
            Ok(rescued) => rescued,
            Err(err) => {
                warn!(error = %err, "report timeout check failed");
                0
            }
        }
    }

    /// Probe connectivity; an offline-to-online transition triggers an immediate attempt.
    pub async fn ping_and_recover(&self) -> bool {
        let was_online = self.submitter.status() == ApiStatus::Online;
        let online = self.submitter.ping().await;
        if online && !was_online {
            info!("collector reachable again; submitting pending reports");
            self.attempt().await;
        }
        online
    }

    /// Run the loop until the task is aborted.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut subscription = self.open_listener();
        loop {
            let wake = match subscription.as_mut() {
                Some(active) => tokio::select! {
                    _ = ticker.tick() => Wake::Tick,
                    event = active.next() => Wake::Change(event),
                },
                None => {
                    ticker.tick().await;
                    Wake::Reopen
                }
            };
            let trigger = match wake {
                Wake::Tick => true,
                Wake::Reopen => {
                    subscription = self.open_listener();
                    true
                }
                Wake::Change(Some(ChangeEvent::Changed(path))) => is_queued_file(&path),
                Wake::Change(Some(ChangeEvent::Removed(_))) => false,
                Wake::Change(Some(ChangeEvent::Failed(message))) => {
                    warn!(message = %message, "reports listener reported an error");
                    true
                }
                Wake::Change(None) => {
                    debug!("reports listener stopped");
                    subscription = None;
                    false
                }
            };
            if trigger {
                self.attempt().await;
            }
        }
    }

    fn open_listener(&self) -> Option<ChangeSubscription> {
        let dir = self.submitter.queue().dir();
        if let Err(err) = std::fs::create_dir_all(dir) {
            warn!(path = %dir.display(), error = %err, "reports directory unavailable");
            return None;
        }
        match self.changes.open(dir) {
            Ok(subscription) => Some(subscription),
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "reports listener could not be attached");
                None
            }
        }
    }
}

impl std::fmt::Debug for SubmissionRetryLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionRetryLoop")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

enum Wake {
    Tick,
    Reopen,
    Change(Option<ChangeEvent>),
}

fn is_queued_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == TransferState::Queued.suffix())
}
