//! In-process fan-out of agent events with a bounded replay ring.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::{EventBusError, EventBusResult};
use crate::payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId};

/// Live event stream handed to subscribers.
pub type EventStream = BroadcastStream<EventEnvelope>;

/// Cloneable handle to one agent-wide event bus.
///
/// Ids are assigned from 1 upwards, so `backlog_since(0)` replays everything still retained.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    shared: Arc<Shared>,
}

struct Shared {
    ring: Mutex<Ring>,
    next_id: AtomicU64,
}

struct Ring {
    capacity: usize,
    envelopes: VecDeque<EventEnvelope>,
}

impl Ring {
    fn record(&mut self, envelope: EventEnvelope) {
        while self.envelopes.len() >= self.capacity {
            let _ = self.envelopes.pop_front();
        }
        self.envelopes.push_back(envelope);
    }

    fn after(&self, id: EventId) -> Vec<EventEnvelope> {
        let start = self.envelopes.partition_point(|envelope| envelope.id <= id);
        self.envelopes.range(start..).cloned().collect()
    }
}

impl EventBus {
    /// Bus retaining up to `replay_capacity` envelopes (at least one).
    #[must_use]
    pub fn with_capacity(replay_capacity: usize) -> Self {
        let capacity = replay_capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            shared: Arc::new(Shared {
                ring: Mutex::new(Ring {
                    capacity,
                    envelopes: VecDeque::with_capacity(capacity),
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Bus with [`DEFAULT_REPLAY_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Stream of events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Stamp `event`, retain it for replay, and deliver it to live subscribers.
    ///
    /// Publishing with nobody subscribed succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SendFailed`] when subscribers exist but the send is refused.
    pub fn publish(&self, event: Event) -> EventBusResult<EventId> {
        let event_kind = event.kind();
        let envelope = {
            let mut ring = self.ring();
            let envelope = EventEnvelope {
                id: self.shared.next_id.fetch_add(1, Ordering::Relaxed),
                timestamp: Utc::now(),
                event,
            };
            ring.record(envelope.clone());
            envelope
        };
        let event_id = envelope.id;

        if self.sender.receiver_count() == 0 {
            return Ok(event_id);
        }
        match self.sender.send(envelope) {
            Ok(_) => Ok(event_id),
            Err(_) => Err(EventBusError::SendFailed {
                event_id,
                event_kind,
            }),
        }
    }

    /// Id of the newest retained envelope.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.ring().envelopes.back().map(|envelope| envelope.id)
    }

    /// Retained envelopes with an id greater than `id`, oldest first.
    #[must_use]
    pub fn backlog_since(&self, id: EventId) -> Vec<EventEnvelope> {
        self.ring().after(id)
    }

    fn ring(&self) -> MutexGuard<'_, Ring> {
        self.shared
            .ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    type TestResult<T> = anyhow::Result<T>;

    fn settings(description: &str) -> Event {
        Event::SettingsChanged {
            description: description.to_string(),
        }
    }

    #[test]
    fn ring_keeps_only_the_newest_envelopes() -> TestResult<()> {
        let bus = EventBus::with_capacity(3);
        let ids = (0..5)
            .map(|n| bus.publish(settings(&format!("revision {n}"))))
            .collect::<EventBusResult<Vec<_>>>()?;

        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(bus.last_event_id(), Some(5));
        let retained: Vec<_> = bus.backlog_since(0).iter().map(|e| e.id).collect();
        assert_eq!(retained, vec![3, 4, 5]);
        let tail: Vec<_> = bus.backlog_since(4).iter().map(|e| e.id).collect();
        assert_eq!(tail, vec![5]);
        assert!(bus.backlog_since(5).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn subscribers_see_only_later_events() -> TestResult<()> {
        let bus = EventBus::new();
        bus.publish(settings("before subscribing"))?;
        let mut stream = bus.subscribe();
        let id = bus.publish(Event::ConnectivityChanged {
            status: "Online".into(),
        })?;

        let envelope = stream
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("stream closed"))??;
        assert_eq!(envelope.id, id);
        assert_eq!(
            envelope.event,
            Event::ConnectivityChanged {
                status: "Online".into()
            }
        );
        Ok(())
    }
}
