//! Pull-loop conversion workers.
//!
//! # Design
//! - Workers are independent tasks asking the dispatcher for work; nothing pushes to them.
//! - Each conversion runs in its own task so a panic is observed as a join error; any failure
//!   retires the worker and the next resize spawns a replacement.
//! - Idle workers flush archive batches, then retire after a longer quiet period.
//! - The last worker to leave flushes every archive batch.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use convoy_events::Event;
use tracing::{debug, error, warn};

use crate::dispatcher::ConversionDispatcher;

/// Worker loop timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerTuning {
    /// Sleep between empty polls.
    pub idle_poll: Duration,
    /// Empty polls before archive batches are flushed.
    pub flush_after_idle_polls: u32,
    /// Empty polls before the worker retires.
    pub exit_after_idle_polls: u32,
}

impl Default for WorkerTuning {
    fn default() -> Self {
        Self {
            idle_poll: Duration::from_millis(500),
            flush_after_idle_polls: 20,
            exit_after_idle_polls: 240,
        }
    }
}

/// Bookkeeping for running workers.
pub(crate) struct WorkerPool {
    active: AtomicUsize,
    next_id: AtomicUsize,
    shutting_down: AtomicBool,
}

impl WorkerPool {
    pub(crate) const fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Claim a slot when fewer than `desired` workers run; returns the new worker id.
    pub(crate) fn try_reserve(&self, desired: usize) -> Option<usize> {
        if self.is_shutting_down() {
            return None;
        }
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < desired).then_some(active + 1)
            })
            .ok()
            .map(|_| self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Release a slot; returns the number of workers still running.
    pub(crate) fn release(&self) -> usize {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                Some(active.saturating_sub(1))
            })
            .map_or(0, |previous| previous.saturating_sub(1))
    }

    pub(crate) fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

pub(crate) async fn run(dispatcher: ConversionDispatcher, id: usize, tuning: WorkerTuning) {
    debug!(worker = id, "worker started");
    let mut idle_polls: u32 = 0;

    while !dispatcher.is_shutting_down() {
        let Some(item) = dispatcher.try_dequeue_next(id) else {
            idle_polls = idle_polls.saturating_add(1);
            if idle_polls == tuning.flush_after_idle_polls {
                dispatcher.flush_archives().await;
            }
            if idle_polls >= tuning.exit_after_idle_polls {
                debug!(worker = id, "worker idle; retiring");
                break;
            }
            tokio::time::sleep(tuning.idle_poll).await;
            continue;
        };
        idle_polls = 0;

        let Some(owner) = item.owner() else {
            dispatcher.remove_file(item.path());
            continue;
        };
        let source = item.source().to_string();
        let path = item.path().display().to_string();
        match tokio::spawn(async move { owner.convert(item).await }).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(worker = id, error = %err, source = %source, path = %path, "conversion failed; retiring worker");
                dispatcher.signals().publish(Event::ConversionFailed {
                    source,
                    path,
                    message: err.to_string(),
                });
                break;
            }
            Err(join_err) => {
                error!(worker = id, error = %join_err, source = %source, path = %path, "conversion task aborted; retiring worker");
                break;
            }
        }
    }

    let remaining = dispatcher.pool().release();
    dispatcher.signals().metrics.set_active_workers(remaining);
    debug!(worker = id, remaining, "worker stopped");
    if remaining == 0 {
        dispatcher.flush_archives().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_respects_desired_and_shutdown() {
        let pool = WorkerPool::new();
        assert_eq!(pool.try_reserve(2), Some(1));
        assert_eq!(pool.try_reserve(2), Some(2));
        assert_eq!(pool.try_reserve(2), None);
        assert_eq!(pool.active(), 2);

        assert_eq!(pool.release(), 1);
        pool.begin_shutdown();
        assert_eq!(pool.try_reserve(5), None);
        assert_eq!(pool.release(), 0);
        assert_eq!(pool.release(), 0);
    }
}
