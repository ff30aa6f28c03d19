//! Exclusive source file locking with a bounded poll-sleep retry.
//!
//! Producers may still be writing a file when it is discovered; the lock is retried until the
//! budget runs out. A missing file fails immediately.

use std::fs::{File, TryLockError};
use std::io;
use std::path::Path;

use tracing::debug;

use crate::dispatcher::ConversionItem;
use crate::error::{PipelineError, PipelineResult};
use crate::retry::RetryPolicy;

/// Open `item`'s file for reading and take an exclusive lock on it.
///
/// `is_disposing` is checked between attempts; a `true` result aborts with
/// [`PipelineError::Disposing`].
///
/// # Errors
///
/// Returns an IO error when the file is gone, [`PipelineError::LockTimeout`] when the budget is
/// exhausted, or [`PipelineError::Disposing`] on shutdown.
pub async fn acquire(
    item: &ConversionItem,
    policy: RetryPolicy,
    is_disposing: impl Fn() -> bool,
) -> PipelineResult<File> {
    let attempts = policy.attempts();
    for attempt in 1..=attempts {
        if is_disposing() {
            return Err(PipelineError::Disposing {
                source_name: item.source().to_string(),
            });
        }
        match try_lock(item.path()) {
            Ok(file) => return Ok(file),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(PipelineError::io("lock.open", item.path(), err));
            }
            Err(err) => {
                item.record_lock_attempt();
                debug!(
                    path = %item.path().display(),
                    attempt,
                    error = %err,
                    "source file busy"
                );
            }
        }
        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    Err(PipelineError::LockTimeout {
        path: item.path().to_path_buf(),
        attempts,
    })
}

fn try_lock(path: &Path) -> io::Result<File> {
    let file = File::open(path)?;
    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        Err(TryLockError::Error(err)) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{ConversionDispatcher, ConversionTarget, DispatcherSettings};
    use crate::signals::Signals;
    use async_trait::async_trait;
    use convoy_events::EventBus;
    use convoy_telemetry::Metrics;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    type TestResult<T> = anyhow::Result<T>;

    struct Owner;

    #[async_trait]
    impl ConversionTarget for Owner {
        fn name(&self) -> &str {
            "lock-test"
        }

        async fn convert(&self, _item: Arc<ConversionItem>) -> PipelineResult<()> {
            Ok(())
        }

        async fn flush_archive(&self) {}
    }

    const FAST: RetryPolicy = RetryPolicy {
        budget: Duration::from_millis(100),
        interval: Duration::from_millis(20),
    };

    fn tracked(path: &Path) -> TestResult<(ConversionDispatcher, Arc<ConversionItem>, Arc<dyn ConversionTarget>)> {
        let dispatcher = ConversionDispatcher::new(
            DispatcherSettings::default(),
            Signals::new(EventBus::new(), Metrics::new()?),
        )?;
        dispatcher.pool().begin_shutdown();
        let owner: Arc<dyn ConversionTarget> = Arc::new(Owner);
        let item = dispatcher.register_file(path.to_path_buf(), SystemTime::now(), &owner);
        Ok((dispatcher, item, owner))
    }

    #[tokio::test]
    async fn acquires_unlocked_file() -> TestResult<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("a.json");
        std::fs::write(&path, b"{}")?;
        let (_dispatcher, item, _owner) = tracked(&path)?;

        let file = acquire(&item, FAST, || false).await?;
        drop(file);
        assert_eq!(item.lock_iterations(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn times_out_while_another_handle_holds_the_lock() -> TestResult<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("a.json");
        std::fs::write(&path, b"{}")?;
        let (_dispatcher, item, _owner) = tracked(&path)?;
        let holder = File::open(&path)?;
        holder.lock()?;

        let result = acquire(&item, FAST, || false).await;
        assert!(matches!(result, Err(PipelineError::LockTimeout { attempts: 5, .. })));
        assert_eq!(item.lock_iterations(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_and_disposal_abort_immediately() -> TestResult<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("gone.json");
        let (_dispatcher, item, _owner) = tracked(&path)?;

        let missing = acquire(&item, FAST, || false).await;
        assert!(missing.is_err_and(|err| err.is_not_found()));

        std::fs::write(&path, b"{}")?;
        let disposing = AtomicBool::new(true);
        let result = acquire(&item, FAST, || disposing.load(Ordering::Relaxed)).await;
        assert!(matches!(result, Err(PipelineError::Disposing { .. })));
        Ok(())
    }
}
