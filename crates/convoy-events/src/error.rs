//! Publication failures.

use std::fmt::{self, Display, Formatter};

use crate::payloads::EventId;

/// Result wrapper for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Raised when subscribers exist but none accepted the envelope.
///
/// The event is still in the replay backlog; only live delivery failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventBusError {
    /// Broadcast send was refused.
    SendFailed {
        /// Sequence number the bus assigned.
        event_id: EventId,
        /// Kind tag of the event, for log fields.
        event_kind: &'static str,
    },
}

impl EventBusError {
    /// Sequence number of the undelivered event.
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        let Self::SendFailed { event_id, .. } = *self;
        event_id
    }

    /// Kind tag of the undelivered event.
    #[must_use]
    pub const fn event_kind(&self) -> &'static str {
        let Self::SendFailed { event_kind, .. } = *self;
        event_kind
    }
}

impl Display for EventBusError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("event not delivered to subscribers")
    }
}

impl std::error::Error for EventBusError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_report_the_undelivered_event() {
        let err = EventBusError::SendFailed {
            event_id: 42,
            event_kind: "conversion_completed",
        };
        assert_eq!((err.event_id(), err.event_kind()), (42, "conversion_completed"));
        assert_eq!(err.to_string(), "event not delivered to subscribers");
    }
}
