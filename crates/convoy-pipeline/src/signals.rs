//! Event publication and component health tracking.

use std::sync::{Mutex, MutexGuard};

use convoy_events::{Event, EventBus};
use convoy_telemetry::Metrics;
use tracing::{error, info, warn};

/// Event bus and metrics handles shared by pipeline components.
#[derive(Clone)]
pub struct Signals {
    pub(crate) events: EventBus,
    pub(crate) metrics: Metrics,
}

impl Signals {
    /// Bundle the handles.
    #[must_use]
    pub const fn new(events: EventBus, metrics: Metrics) -> Self {
        Self { events, metrics }
    }

    /// Event bus handle.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Metrics handle.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Publish `event`, counting it on success. Failures are logged, never returned.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        match self.events.publish(event) {
            Ok(_) => self.metrics.inc_event(kind),
            Err(error) => warn!(
                event_id = error.event_id(),
                event_kind = error.event_kind(),
                error = %error,
                "failed to publish event"
            ),
        }
    }
}

/// Degraded/recovered flag that publishes `HealthChanged` on transitions.
pub(crate) struct HealthFlag {
    component: String,
    degraded: Mutex<bool>,
}

impl HealthFlag {
    pub(crate) fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            degraded: Mutex::new(false),
        }
    }

    pub(crate) fn mark_degraded(&self, signals: &Signals, detail: &str) {
        let mut guard = self.lock();
        if *guard {
            drop(guard);
            warn!(component = %self.component, detail = detail, "component still degraded");
        } else {
            *guard = true;
            drop(guard);
            warn!(component = %self.component, detail = detail, "component degraded");
            signals.publish(Event::HealthChanged {
                degraded: vec![self.component.clone()],
            });
        }
    }

    pub(crate) fn mark_recovered(&self, signals: &Signals) {
        let mut guard = self.lock();
        if std::mem::take(&mut *guard) {
            drop(guard);
            signals.publish(Event::HealthChanged { degraded: vec![] });
            info!(component = %self.component, "component recovered");
        }
    }

    #[cfg(test)]
    pub(crate) fn is_degraded(&self) -> bool {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        match self.degraded.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!(component = %self.component, "health mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}
