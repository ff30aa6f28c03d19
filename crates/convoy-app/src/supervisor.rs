//! Host lifecycle for the agent.
//!
//! # Design
//! - One state machine guards every lifecycle call: `Stopped → Starting → Running`,
//!   `Running → Pausing → Paused → Running`, and `Running | Paused → Stopping → Stopped`.
//!   Anything else is rejected with [`AppError::InvalidTransition`].
//! - Lifecycle calls are serialised; scheduled ticks only read the runtime.
//! - Scheduled tasks (retry loop, housekeeping, ping) exist only while `Running`. Pause aborts
//!   them and resume spawns fresh ones.
//! - Tasks hold a weak handle so dropping the supervisor ends them.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use convoy_config::{AgentConfig, ConfigSnapshot};
use convoy_core::SubmissionApi;
use convoy_events::Event;
use convoy_submit::{ReportSubmitter, SubmissionRetryLoop};
use convoy_telemetry::record_service_state;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::runtime::{ConversionRuntime, RuntimeDeps};
use crate::status::{ClientStatus, SourceStatus, StatusSnapshot, write_snapshot};

/// Service lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Nothing running.
    Stopped,
    /// Building and starting the conversion runtime.
    Starting,
    /// Converting and submitting.
    Running,
    /// Detaching listeners.
    Pausing,
    /// Listeners detached, scheduled tasks suspended.
    Paused,
    /// Draining workers and flushing archives.
    Stopping,
}

impl ServiceState {
    /// Stable name used in logs, events, and snapshots.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
        }
    }

    /// Whether the supervisor may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Stopped, Self::Starting)
                | (Self::Starting, Self::Running | Self::Stopped)
                | (Self::Running, Self::Pausing | Self::Stopping)
                | (Self::Pausing, Self::Paused)
                | (Self::Paused, Self::Running | Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduled task periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Watcher health checks, stale-item rescue, pool resize, queue timeouts.
    pub housekeeping_interval: Duration,
    /// Connectivity probe.
    pub ping_interval: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            housekeeping_interval: Duration::from_secs(60),
            ping_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Owns the conversion runtime, the submission retry loop, and the scheduled tasks.
pub struct Supervisor {
    state: Mutex<ServiceState>,
    lifecycle: AsyncMutex<()>,
    config: Mutex<AgentConfig>,
    runtime: AsyncMutex<Option<ConversionRuntime>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    retry: Arc<SubmissionRetryLoop>,
    deps: RuntimeDeps,
    settings: SupervisorSettings,
    me: Weak<Self>,
}

impl Supervisor {
    /// Supervisor in the `Stopped` state.
    #[must_use]
    pub fn new(
        config: AgentConfig,
        retry: Arc<SubmissionRetryLoop>,
        deps: RuntimeDeps,
        settings: SupervisorSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            state: Mutex::new(ServiceState::Stopped),
            lifecycle: AsyncMutex::new(()),
            config: Mutex::new(config),
            runtime: AsyncMutex::new(None),
            tasks: Mutex::new(Vec::new()),
            retry,
            deps,
            settings,
            me: me.clone(),
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        *lock(&self.state, "service state")
    }

    /// Submitter behind the retry loop.
    #[must_use]
    pub fn submitter(&self) -> &Arc<ReportSubmitter> {
        self.retry.submitter()
    }

    /// Probe the collector, build and start the conversion runtime, and schedule tasks.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidTransition`] unless `Stopped`, or the runtime build failure
    /// (the service returns to `Stopped`).
    pub async fn start(&self) -> AppResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.advance(ServiceState::Starting)?;

        let online = self.submitter().ping().await;
        info!(online, api_status = %self.submitter().status(), "initial connectivity probe");

        let config = self.config();
        let runtime = match ConversionRuntime::build(&config, &self.deps) {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(error = %err, "conversion runtime could not be built");
                self.advance(ServiceState::Stopped)?;
                return Err(err);
            }
        };
        let started = runtime.start_all().await;
        info!(started, configured = runtime.watchers().len(), "source watchers started");
        *self.runtime.lock().await = Some(runtime);

        self.spawn_tasks();
        self.advance(ServiceState::Running)?;
        self.write_status().await;
        Ok(())
    }

    /// Detach every change listener and suspend scheduled tasks.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidTransition`] unless `Running`.
    pub async fn pause(&self) -> AppResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.advance(ServiceState::Pausing)?;
        self.abort_tasks();
        if let Some(runtime) = self.runtime.lock().await.as_ref() {
            runtime.stop_listening();
        }
        self.advance(ServiceState::Paused)?;
        self.write_status().await;
        Ok(())
    }

    /// Restart every watcher and resume scheduled tasks.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidTransition`] unless `Paused`.
    pub async fn resume(&self) -> AppResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.advance(ServiceState::Running)?;
        if let Some(runtime) = self.runtime.lock().await.as_ref() {
            runtime.resume_all().await;
        }
        self.spawn_tasks();
        self.write_status().await;
        Ok(())
    }

    /// Abort scheduled tasks, dispose the conversion runtime, and write a final snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidTransition`] unless `Running` or `Paused`.
    pub async fn stop(&self) -> AppResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.advance(ServiceState::Stopping)?;
        self.abort_tasks();
        let runtime = self.runtime.lock().await.take();
        if let Some(runtime) = runtime {
            if !runtime.dispose().await {
                warn!("conversion workers did not drain before shutdown");
            }
        }
        self.advance(ServiceState::Stopped)?;
        self.write_status().await;
        Ok(())
    }

    /// Apply a new configuration revision: the running conversion runtime is replaced.
    ///
    /// Collector and report queue settings are bound at bootstrap and take effect on restart.
    ///
    /// # Errors
    ///
    /// Returns the runtime build failure; the previous runtime has already been disposed.
    pub async fn reload(&self, snapshot: ConfigSnapshot) -> AppResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let ConfigSnapshot { revision, config } = snapshot;
        let previous = std::mem::replace(&mut *lock(&self.config, "configuration"), config.clone());
        if previous.collector != config.collector || previous.reports_dir != config.reports_dir {
            warn!(revision, "collector and reports_dir changes take effect after restart");
        }

        let state = self.state();
        let description = if matches!(state, ServiceState::Running | ServiceState::Paused) {
            let mut slot = self.runtime.lock().await;
            if let Some(old) = slot.take() {
                old.dispose().await;
            }
            let runtime = ConversionRuntime::build(&config, &self.deps)?;
            if state == ServiceState::Running {
                runtime.start_all().await;
            }
            let sources = runtime.watchers().len();
            *slot = Some(runtime);
            format!("revision {revision} applied with {sources} sources")
        } else {
            format!("revision {revision} stored while {state}")
        };

        info!(revision, %state, "configuration reloaded");
        self.deps.signals.publish(Event::SettingsChanged { description });
        self.write_status().await;
        Ok(())
    }

    /// One housekeeping tick.
    pub async fn housekeeping(&self) {
        if let Some(runtime) = self.runtime.lock().await.as_ref() {
            runtime.housekeeping().await;
        }
        let rescued = self.retry.check_timeouts();
        if rescued > 0 {
            debug!(rescued, "timed-out reports requeued");
        }
        self.write_status().await;
    }

    /// One connectivity tick.
    pub async fn ping(&self) {
        self.retry.ping_and_recover().await;
        self.write_status().await;
    }

    /// Current status document.
    ///
    /// # Errors
    ///
    /// Returns an error when the report queue cannot be counted.
    pub async fn snapshot(&self) -> AppResult<StatusSnapshot> {
        let pending = self
            .submitter()
            .pending_counts()
            .map_err(|err| AppError::submit("status.pending_counts", err))?;
        let sources = self
            .runtime
            .lock()
            .await
            .as_ref()
            .map(ConversionRuntime::statistics)
            .unwrap_or_default()
            .into_iter()
            .map(SourceStatus::from)
            .collect();
        let service_state = self.state();
        let api_status = self.submitter().status();
        Ok(StatusSnapshot {
            generated_at: Utc::now(),
            service_state,
            api_status,
            client_status: ClientStatus::derive(service_state, api_status),
            pending,
            sources,
            metrics: self.deps.signals.metrics().snapshot(),
        })
    }

    /// Write the status document; failures are logged.
    pub async fn write_status(&self) {
        let path = self.config().status_path;
        let result = match self.snapshot().await {
            Ok(snapshot) => write_snapshot(&path, &snapshot),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "status snapshot not written");
        }
    }

    fn config(&self) -> AgentConfig {
        lock(&self.config, "configuration").clone()
    }

    fn advance(&self, next: ServiceState) -> AppResult<()> {
        let previous = {
            let mut state = lock(&self.state, "service state");
            if !state.can_transition_to(next) {
                return Err(AppError::InvalidTransition {
                    from: state.as_str(),
                    to: next.as_str(),
                });
            }
            std::mem::replace(&mut *state, next)
        };
        info!(from = %previous, to = %next, "service state changed");
        record_service_state(next.as_str());
        self.deps.signals.publish(Event::ServiceStateChanged {
            state: next.as_str().to_string(),
        });
        Ok(())
    }

    fn spawn_tasks(&self) {
        let handles = vec![
            Arc::clone(&self.retry).spawn(),
            spawn_ticker(
                self.me.clone(),
                self.settings.housekeeping_interval,
                housekeeping_tick,
            ),
            spawn_ticker(self.me.clone(), self.settings.ping_interval, ping_tick),
        ];
        let mut tasks = lock(&self.tasks, "scheduled tasks");
        for stale in tasks.drain(..) {
            stale.abort();
        }
        tasks.extend(handles);
    }

    fn abort_tasks(&self) {
        for task in lock(&self.tasks, "scheduled tasks").drain(..) {
            task.abort();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

type Tick = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Run `tick` every `period`, first after one full period, until the supervisor is gone.
fn spawn_ticker(
    supervisor: Weak<Supervisor>,
    period: Duration,
    tick: fn(Arc<Supervisor>) -> Tick,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(supervisor) = supervisor.upgrade() else {
                return;
            };
            tick(supervisor).await;
        }
    })
}

fn housekeeping_tick(supervisor: Arc<Supervisor>) -> Tick {
    Box::pin(async move { supervisor.housekeeping().await })
}

fn ping_tick(supervisor: Arc<Supervisor>) -> Tick {
    Box::pin(async move { supervisor.ping().await })
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            error!(what, "supervisor mutex poisoned; continuing with recovered guard");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_graph_matches_host_expectations() {
        use ServiceState::{Paused, Pausing, Running, Starting, Stopped, Stopping};
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Starting.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Pausing));
        assert!(Pausing.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Paused.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));

        assert!(!Stopped.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Paused));
        assert!(!Running.can_transition_to(Running));
        assert!(!Running.can_transition_to(Paused));
        assert!(!Stopping.can_transition_to(Running));
    }
}
