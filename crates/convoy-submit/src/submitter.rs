//! Queueing implementation of the submission API.
//!
//! # Design
//! - `Online` submissions go straight to the collector, `Offline` ones to the durable queue, and
//!   `Automatic` ones pick based on the cached API status, falling back to the queue.
//! - One async lock serialises collector traffic and the status writes it causes.
//! - Queue passes stop as soon as the API leaves `Online`; the retry loop picks up the rest.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use convoy_core::{ApiStatus, CoreError, CoreResult, Report, SubmissionApi, SubmitMethod};
use convoy_events::{Event, EventBus};
use convoy_telemetry::Metrics;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::collector::CollectorClient;
use crate::error::{CollectorError, SubmitError, SubmitResult};
use crate::queue::{PASS_LIMIT, PendingCounts, ReportQueue, TransferState};

const COLLECTOR_COMPONENT: &str = "collector";

/// Outcome of one pass over the `Queued` files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingPass {
    /// Delivered and deleted.
    pub submitted: usize,
    /// Moved to `Error`.
    pub failed: usize,
    /// Moved to `InvalidReport`.
    pub invalid: usize,
}

/// Submission API backed by the durable queue and a collector client.
pub struct ReportSubmitter {
    queue: ReportQueue,
    client: Option<Arc<dyn CollectorClient>>,
    status: Mutex<ApiStatus>,
    transfer: AsyncMutex<()>,
    pending_delay: Duration,
    events: EventBus,
    metrics: Metrics,
}

impl ReportSubmitter {
    /// Submitter for `queue`. Without a client the API stays `NotRegistered` and only queues.
    #[must_use]
    pub fn new(
        queue: ReportQueue,
        client: Option<Arc<dyn CollectorClient>>,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        let status = if client.is_some() {
            ApiStatus::Unknown
        } else {
            ApiStatus::NotRegistered
        };
        Self {
            queue,
            client,
            status: Mutex::new(status),
            transfer: AsyncMutex::new(()),
            pending_delay: Duration::ZERO,
            events,
            metrics,
        }
    }

    /// Pause between deliveries during a queue pass.
    #[must_use]
    pub const fn with_pending_delay(mut self, delay: Duration) -> Self {
        self.pending_delay = delay;
        self
    }

    /// Underlying queue.
    #[must_use]
    pub const fn queue(&self) -> &ReportQueue {
        &self.queue
    }

    /// Queue file counts; refreshes the queued-reports gauge.
    ///
    /// # Errors
    ///
    /// Returns an error when the reports directory cannot be listed.
    pub fn pending_counts(&self) -> SubmitResult<PendingCounts> {
        let counts = self.queue.counts()?;
        self.metrics.set_queued_reports(counts.current);
        Ok(counts)
    }

    /// Refuse further submissions.
    pub fn dispose(&self) {
        self.set_status(ApiStatus::Disposing);
    }

    /// Deliver `Queued` files oldest first while the API stays online.
    ///
    /// # Errors
    ///
    /// Returns queue IO failures; collector failures are recorded on the files instead.
    pub async fn submit_pending(&self) -> SubmitResult<PendingPass> {
        let Some(client) = self.client.clone() else {
            return Ok(PendingPass::default());
        };
        let _transfer = self.transfer.lock().await;
        let mut pass = PendingPass::default();

        for file in self.queue.list(TransferState::Queued)?.into_iter().take(PASS_LIMIT) {
            if self.status() != ApiStatus::Online {
                debug!(status = %self.status(), "collector not online; pass stopped");
                break;
            }

            let report = match self.queue.load(&file).and_then(|report| {
                report.validate()?;
                Ok(report)
            }) {
                Ok(report) => report,
                Err(err) => {
                    warn!(report = %file.id(), error = %err, "queued report unreadable");
                    self.queue.transition(&file, TransferState::InvalidReport)?;
                    pass.invalid += 1;
                    continue;
                }
            };

            let in_flight = self.queue.transition(&file, TransferState::Transfering)?;
            match client.upload(&report).await {
                Ok(()) => {
                    self.queue.remove(&in_flight)?;
                    self.record_accepted(&report);
                    pass.submitted += 1;
                }
                Err(err) => {
                    let target = self.classify_failure(&report, &err);
                    self.queue.transition(&in_flight, target)?;
                    if target == TransferState::InvalidReport {
                        pass.invalid += 1;
                    } else {
                        pass.failed += 1;
                    }
                }
            }

            if !self.pending_delay.is_zero() {
                tokio::time::sleep(self.pending_delay).await;
            }
        }

        if pass != PendingPass::default() {
            info!(
                submitted = pass.submitted,
                failed = pass.failed,
                invalid = pass.invalid,
                "pending reports pass finished"
            );
        }
        self.pending_counts()?;
        Ok(pass)
    }

    fn classify_failure(&self, report: &Report, err: &CollectorError) -> TransferState {
        match err {
            CollectorError::Rejected { status, detail } => {
                warn!(report = %report.id, status, detail = ?detail, "collector rejected report");
                self.metrics.inc_submission("rejected");
                self.publish(Event::ReportRejected {
                    report_id: report.id,
                    reason: detail.clone().unwrap_or_else(|| format!("http {status}")),
                });
                TransferState::InvalidReport
            }
            CollectorError::Throttled => {
                warn!(report = %report.id, "collector throttled delivery");
                self.metrics.inc_submission("throttled");
                self.set_status(ApiStatus::Offline);
                TransferState::Error
            }
            CollectorError::Status { .. } | CollectorError::Unreachable { .. } => {
                warn!(report = %report.id, error = %err, "report delivery failed");
                self.metrics.inc_submission("failed");
                self.set_status(ApiStatus::Error);
                TransferState::Error
            }
        }
    }

    async fn upload_direct(&self, report: &Report) -> CoreResult<bool> {
        let Some(client) = self.client.clone() else {
            return Err(CoreError::SubmissionNotAllowed {
                status: ApiStatus::NotRegistered.as_str(),
            });
        };
        report.validate()?;
        let _transfer = self.transfer.lock().await;
        match client.upload(report).await {
            Ok(()) => {
                self.record_accepted(report);
                Ok(true)
            }
            Err(err @ CollectorError::Rejected { .. }) => {
                self.classify_failure(report, &err);
                Ok(false)
            }
            Err(err) => {
                self.classify_failure(report, &err);
                Err(SubmitError::from(err).into())
            }
        }
    }

    fn enqueue(&self, report: &Report) -> CoreResult<bool> {
        report.validate()?;
        let file = self.queue.save(report)?;
        debug!(report = %report.id, path = %file.path().display(), "report queued");
        self.metrics.inc_submission("queued");
        self.publish(Event::ReportQueued {
            report_id: report.id,
        });
        if let Err(err) = self.pending_counts() {
            warn!(error = %err, "queued report count unavailable");
        }
        Ok(true)
    }

    fn record_accepted(&self, report: &Report) {
        debug!(report = %report.id, "report delivered");
        self.metrics.inc_submission("accepted");
        self.publish(Event::ReportSubmitted {
            report_id: report.id,
        });
    }

    fn set_status(&self, next: ApiStatus) {
        let previous = {
            let mut status = self.lock_status();
            if *status == next || *status == ApiStatus::Disposing {
                return;
            }
            std::mem::replace(&mut *status, next)
        };
        info!(from = %previous, to = %next, "collector status changed");
        self.publish(Event::ConnectivityChanged {
            status: next.as_str().to_string(),
        });
        if previous == ApiStatus::Online {
            self.publish(Event::HealthChanged {
                degraded: vec![COLLECTOR_COMPONENT.to_string()],
            });
        } else if next == ApiStatus::Online && previous != ApiStatus::Unknown {
            self.publish(Event::HealthChanged { degraded: vec![] });
        }
    }

    fn publish(&self, event: Event) {
        let kind = event.kind();
        match self.events.publish(event) {
            Ok(_) => self.metrics.inc_event(kind),
            Err(err) => warn!(
                event_id = err.event_id(),
                event_kind = err.event_kind(),
                error = %err,
                "failed to publish event"
            ),
        }
    }

    fn lock_status(&self) -> MutexGuard<'_, ApiStatus> {
        match self.status.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("api status mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

#[async_trait]
impl SubmissionApi for ReportSubmitter {
    async fn submit(&self, method: SubmitMethod, report: &Report) -> CoreResult<bool> {
        match method {
            SubmitMethod::Online => self.upload_direct(report).await,
            SubmitMethod::Offline => self.enqueue(report),
            SubmitMethod::Automatic => match self.status() {
                ApiStatus::Online => match self.upload_direct(report).await {
                    Ok(accepted) => Ok(accepted),
                    Err(err @ CoreError::InvalidReport { .. }) => Err(err),
                    Err(err) => {
                        warn!(report = %report.id, error = %err, "direct delivery failed; queueing");
                        self.set_status(ApiStatus::Offline);
                        self.enqueue(report)
                    }
                },
                ApiStatus::Offline | ApiStatus::Error | ApiStatus::NotRegistered => {
                    self.enqueue(report)
                }
                status @ (ApiStatus::Unknown | ApiStatus::Disposing) => {
                    Err(CoreError::SubmissionNotAllowed {
                        status: status.as_str(),
                    })
                }
            },
        }
    }

    async fn submit_from_file(&self, method: SubmitMethod, path: &Path) -> CoreResult<bool> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| CoreError::from(SubmitError::io("submit.read_file", path, err)))?;
        let report: Report = serde_json::from_slice(&bytes).map_err(|err| {
            CoreError::from(SubmitError::serialization("submit.decode_file", path, err))
        })?;
        self.submit(method, &report).await
    }

    async fn ping(&self) -> bool {
        if self.status() == ApiStatus::Disposing {
            return false;
        }
        let Some(client) = self.client.clone() else {
            self.set_status(ApiStatus::NotRegistered);
            return false;
        };
        match client.ping().await {
            Ok(()) => {
                self.set_status(ApiStatus::Online);
                true
            }
            Err(err) => {
                debug!(error = %err, "collector ping failed");
                self.set_status(ApiStatus::Offline);
                false
            }
        }
    }

    fn status(&self) -> ApiStatus {
        *self.lock_status()
    }
}

impl std::fmt::Debug for ReportSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportSubmitter")
            .field("queue", &self.queue)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
