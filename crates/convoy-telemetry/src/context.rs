//! Process-wide `agent` span.

use tracing::{Span, field, span::Entered};

use crate::init::build_sha;

/// Keeps the `agent` span entered until dropped.
///
/// Every event logged while the guard lives carries the agent role, the process id, the build
/// identifier, and the latest service state recorded through [`record_service_state`].
pub struct GlobalContextGuard {
    _entered: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter the span for an agent acting as `role`; the service state starts as `stopped`.
    #[must_use]
    pub fn new(role: impl Into<String>) -> Self {
        let role = role.into();
        let span: &'static Span = Box::leak(Box::new(tracing::info_span!(
            "agent",
            role = %role,
            pid = std::process::id(),
            build_sha = %build_sha(),
            service_state = "stopped",
        )));
        Self {
            _entered: span.enter(),
        }
    }
}

/// Overwrite the service state carried by the current span.
pub fn record_service_state(state: &str) {
    Span::current().record("service_state", field::display(state));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_state_can_be_recorded_inside_and_outside_the_span() {
        record_service_state("starting");
        let guard = GlobalContextGuard::new("agent");
        record_service_state("running");
        drop(guard);
    }
}
