//! Global registry of discovered source files and the pull-based ready queue.
//!
//! # Design
//! - One exclusive lock guards the item map and the ready queue together; registration and
//!   dequeue are atomic check-and-set operations over the whole collection.
//! - The ready queue is refilled from `Pending` items, oldest modification time first, only
//!   once it has drained. Items registered mid-drain wait for the next refill.
//! - Worker pool sizing is decided here, never by individual workers.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use convoy_events::Event;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use crate::error::{PipelineError, PipelineResult};
use crate::signals::Signals;
use crate::worker::{self, WorkerPool, WorkerTuning};

/// Hard ceiling on pool size regardless of configuration.
pub const WORKER_CEILING: usize = 50;
/// Items each worker is expected to absorb when sizing the pool.
pub const ITEMS_PER_WORKER: usize = 10;

/// Something that owns discovered files and knows how to convert them.
#[async_trait]
pub trait ConversionTarget: Send + Sync {
    /// Source name used in logs, events and metrics.
    fn name(&self) -> &str;

    /// Convert one dequeued item and apply its disposition.
    ///
    /// # Errors
    ///
    /// An error means the worker is no longer trustworthy and exits.
    async fn convert(&self, item: Arc<ConversionItem>) -> PipelineResult<()>;

    /// Flush any pending archive batch.
    async fn flush_archive(&self);
}

/// Lifecycle of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Waiting for a worker.
    Pending,
    /// Held by a worker.
    Processing,
    /// Conversion finished; disposition in progress.
    PostProcessing,
    /// Disposition committed and the item left the registry.
    Done,
}

#[derive(Debug)]
struct ItemStatus {
    state: ItemState,
    processing_started: Option<Instant>,
    worker: Option<usize>,
}

/// One discovered source file.
pub struct ConversionItem {
    path: PathBuf,
    source: String,
    owner: Weak<dyn ConversionTarget>,
    file_modified: SystemTime,
    enqueued_at: SystemTime,
    lock_iterations: AtomicU32,
    status: Mutex<ItemStatus>,
}

impl ConversionItem {
    fn new(path: PathBuf, file_modified: SystemTime, owner: &Arc<dyn ConversionTarget>) -> Self {
        Self {
            path,
            source: owner.name().to_string(),
            owner: Arc::downgrade(owner),
            file_modified,
            enqueued_at: SystemTime::now(),
            lock_iterations: AtomicU32::new(0),
            status: Mutex::new(ItemStatus {
                state: ItemState::Pending,
                processing_started: None,
                worker: None,
            }),
        }
    }

    /// Absolute source path; the registry key.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the source that discovered the file.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Owning target, if it is still alive.
    #[must_use]
    pub fn owner(&self) -> Option<Arc<dyn ConversionTarget>> {
        self.owner.upgrade()
    }

    /// Modification time observed at discovery.
    #[must_use]
    pub const fn file_modified(&self) -> SystemTime {
        self.file_modified
    }

    /// When the item was registered.
    #[must_use]
    pub const fn enqueued_at(&self) -> SystemTime {
        self.enqueued_at
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ItemState {
        self.lock_status().state
    }

    /// Worker currently (or last) holding the item.
    #[must_use]
    pub fn worker(&self) -> Option<usize> {
        self.lock_status().worker
    }

    /// Failed lock attempts so far.
    #[must_use]
    pub fn lock_iterations(&self) -> u32 {
        self.lock_iterations.load(Ordering::Relaxed)
    }

    pub(crate) fn record_lock_attempt(&self) {
        self.lock_iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_state(&self, state: ItemState) {
        self.lock_status().state = state;
    }

    fn begin_processing(&self, worker: usize) -> bool {
        let mut status = self.lock_status();
        if status.state != ItemState::Pending {
            return false;
        }
        status.state = ItemState::Processing;
        status.processing_started = Some(Instant::now());
        status.worker = Some(worker);
        true
    }

    fn rescue_if_stale(&self, max_age: Duration) -> bool {
        let mut status = self.lock_status();
        let stale = matches!(status.state, ItemState::Processing | ItemState::PostProcessing)
            && status
                .processing_started
                .is_some_and(|started| started.elapsed() >= max_age);
        if stale {
            status.state = ItemState::Pending;
            status.processing_started = None;
            status.worker = None;
        }
        stale
    }

    fn lock_status(&self) -> MutexGuard<'_, ItemStatus> {
        self.status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ConversionItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionItem")
            .field("path", &self.path)
            .field("source", &self.source)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Dispatcher tuning.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherSettings {
    /// Configured pool upper bound, further capped at [`WORKER_CEILING`].
    pub max_workers: usize,
    /// Items held outside `Pending` longer than this are handed out again.
    pub stale_after: Duration,
    /// How long shutdown waits for workers to exit.
    pub shutdown_grace: Duration,
    /// Worker loop timings.
    pub tuning: WorkerTuning,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            max_workers: 1,
            stale_after: Duration::from_secs(600),
            shutdown_grace: Duration::from_secs(20),
            tuning: WorkerTuning::default(),
        }
    }
}

#[derive(Default)]
struct Registry {
    items: HashMap<PathBuf, Arc<ConversionItem>>,
    ready: VecDeque<Arc<ConversionItem>>,
}

struct DispatcherInner {
    registry: Mutex<Registry>,
    targets: Mutex<Vec<Weak<dyn ConversionTarget>>>,
    pool: WorkerPool,
    settings: DispatcherSettings,
    runtime: Handle,
    signals: Signals,
}

/// Shared handle to the conversion registry and its worker pool.
#[derive(Clone)]
pub struct ConversionDispatcher {
    inner: Arc<DispatcherInner>,
}

/// Pool size for `pending` tracked items under a configured maximum.
#[must_use]
pub fn desired_workers(pending: usize, max_workers: usize) -> usize {
    pending
        .div_ceil(ITEMS_PER_WORKER)
        .min(max_workers.min(WORKER_CEILING))
}

impl ConversionDispatcher {
    /// Create a dispatcher bound to the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Runtime`] when called outside a runtime.
    pub fn new(settings: DispatcherSettings, signals: Signals) -> PipelineResult<Self> {
        let runtime = Handle::try_current().map_err(|source| PipelineError::Runtime { source })?;
        Ok(Self {
            inner: Arc::new(DispatcherInner {
                registry: Mutex::new(Registry::default()),
                targets: Mutex::new(Vec::new()),
                pool: WorkerPool::new(),
                settings,
                runtime,
                signals,
            }),
        })
    }

    /// Make a target eligible for idle and shutdown archive flushes.
    pub fn attach(&self, target: Weak<dyn ConversionTarget>) {
        let mut targets = self.lock_targets();
        targets.retain(|existing| existing.strong_count() > 0);
        targets.push(target);
    }

    /// Track a discovered file, returning the existing item when the path is already tracked.
    pub fn register_file(
        &self,
        path: PathBuf,
        file_modified: SystemTime,
        owner: &Arc<dyn ConversionTarget>,
    ) -> Arc<ConversionItem> {
        let (item, created, pending) = {
            let mut registry = self.lock_registry();
            if let Some(existing) = registry.items.get(&path) {
                (Arc::clone(existing), false, registry.items.len())
            } else {
                let item = Arc::new(ConversionItem::new(path.clone(), file_modified, owner));
                registry.items.insert(path, Arc::clone(&item));
                (item, true, registry.items.len())
            }
        };

        if created {
            debug!(source = %item.source(), path = %item.path().display(), "file registered");
            self.inner.signals.metrics.set_pending_items(pending);
            self.inner.signals.publish(Event::FileRegistered {
                source: item.source().to_string(),
                path: item.path().display().to_string(),
            });
            self.resize();
        }
        item
    }

    /// Hand the next ready item to `worker`, or `None` when nothing is waiting.
    pub fn try_dequeue_next(&self, worker: usize) -> Option<Arc<ConversionItem>> {
        let mut registry = self.lock_registry();
        loop {
            if registry.ready.is_empty() {
                let mut pending: Vec<_> = registry
                    .items
                    .values()
                    .filter(|item| item.state() == ItemState::Pending)
                    .cloned()
                    .collect();
                pending.sort_by_key(|item| item.file_modified());
                registry.ready.extend(pending);
            }

            let item = registry.ready.pop_front()?;
            let tracked = registry
                .items
                .get(item.path())
                .is_some_and(|current| Arc::ptr_eq(current, &item));
            if tracked && item.begin_processing(worker) {
                return Some(item);
            }
        }
    }

    /// Stop tracking `path`. Unknown paths are ignored.
    pub fn remove_file(&self, path: &Path) {
        let (removed, pending) = {
            let mut registry = self.lock_registry();
            let removed = registry.items.remove(path);
            (removed, registry.items.len())
        };
        if let Some(item) = removed {
            item.set_state(ItemState::Done);
            self.inner.signals.metrics.set_pending_items(pending);
        }
    }

    /// Whether this exact item is still the tracked entry for its path.
    #[must_use]
    pub fn is_tracked(&self, item: &ConversionItem) -> bool {
        self.lock_registry()
            .items
            .get(item.path())
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), item))
    }

    /// Look up the tracked item for `path`.
    #[must_use]
    pub fn item(&self, path: &Path) -> Option<Arc<ConversionItem>> {
        self.lock_registry().items.get(path).cloned()
    }

    /// Number of tracked items in any state.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock_registry().items.len()
    }

    /// Number of tracked items owned by `source`.
    #[must_use]
    pub fn pending_for(&self, source: &str) -> usize {
        self.lock_registry()
            .items
            .values()
            .filter(|item| item.source() == source)
            .count()
    }

    /// Workers currently running.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.inner.pool.active()
    }

    /// Return items stuck outside `Pending` for at least `max_age` to the ready set.
    pub fn rescue_stale(&self, max_age: Duration) -> usize {
        let registry = self.lock_registry();
        let rescued = registry
            .items
            .values()
            .filter(|item| item.rescue_if_stale(max_age))
            .inspect(|item| {
                info!(
                    source = %item.source(),
                    path = %item.path().display(),
                    "stale item returned to pending"
                );
            })
            .count();
        drop(registry);
        rescued
    }

    /// Drop items whose owning target no longer exists.
    pub fn purge_orphans(&self) -> usize {
        let mut registry = self.lock_registry();
        let before = registry.items.len();
        registry.items.retain(|_, item| item.owner.strong_count() > 0);
        let purged = before - registry.items.len();
        let pending = registry.items.len();
        drop(registry);
        if purged > 0 {
            info!(purged, "orphaned items purged");
            self.inner.signals.metrics.set_pending_items(pending);
        }
        purged
    }

    /// Periodic pass: purge orphans, rescue stale items, resize the pool.
    pub fn housekeeping(&self) {
        self.purge_orphans();
        self.rescue_stale(self.inner.settings.stale_after);
        self.resize();
    }

    /// Grow the pool toward the size the current backlog warrants.
    pub fn resize(&self) {
        if self.inner.pool.is_shutting_down() {
            return;
        }
        let pending = self.pending_count();
        let desired = desired_workers(pending, self.inner.settings.max_workers);
        let mut spawned = false;
        while let Some(id) = self.inner.pool.try_reserve(desired) {
            spawned = true;
            let dispatcher = self.clone();
            self.inner
                .runtime
                .spawn(worker::run(dispatcher, id, self.inner.settings.tuning));
        }
        if spawned {
            let active = self.inner.pool.active();
            self.inner.signals.metrics.set_active_workers(active);
            info!(active, desired, pending, "worker pool resized");
            self.inner
                .signals
                .publish(Event::WorkersResized { active, desired });
        }
    }

    /// Flush every attached target's archive batch.
    pub async fn flush_archives(&self) {
        let targets: Vec<_> = self
            .lock_targets()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for target in targets {
            target.flush_archive().await;
        }
    }

    /// Flag workers to stop and wait for them to exit.
    ///
    /// Returns `true` when every worker exited within the grace period.
    pub async fn shutdown(&self) -> bool {
        self.inner.pool.begin_shutdown();
        let deadline = Instant::now() + self.inner.settings.shutdown_grace;
        while self.inner.pool.active() > 0 {
            if Instant::now() >= deadline {
                error!(
                    remaining = self.inner.pool.active(),
                    "workers still running after shutdown grace period"
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        true
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.pool.is_shutting_down()
    }

    pub(crate) fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    pub(crate) fn signals(&self) -> &Signals {
        &self.inner.signals
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        match self.inner.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("dispatcher registry mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    fn lock_targets(&self) -> MutexGuard<'_, Vec<Weak<dyn ConversionTarget>>> {
        self.inner
            .targets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_events::EventBus;
    use convoy_telemetry::Metrics;

    type TestResult<T> = anyhow::Result<T>;

    struct IdleTarget;

    #[async_trait]
    impl ConversionTarget for IdleTarget {
        fn name(&self) -> &str {
            "idle"
        }

        async fn convert(&self, _item: Arc<ConversionItem>) -> PipelineResult<()> {
            Ok(())
        }

        async fn flush_archive(&self) {}
    }

    fn dispatcher(max_workers: usize) -> TestResult<ConversionDispatcher> {
        let signals = Signals::new(EventBus::new(), Metrics::new()?);
        // Workers never start: shutdown is flagged before any registration.
        let dispatcher = ConversionDispatcher::new(
            DispatcherSettings {
                max_workers,
                ..DispatcherSettings::default()
            },
            signals,
        )?;
        dispatcher.pool().begin_shutdown();
        Ok(dispatcher)
    }

    fn stamp(offset_secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + offset_secs)
    }

    #[test]
    fn desired_workers_follows_backlog_and_caps() {
        assert_eq!(desired_workers(0, 5), 0);
        assert_eq!(desired_workers(1, 5), 1);
        assert_eq!(desired_workers(10, 5), 1);
        assert_eq!(desired_workers(11, 5), 2);
        assert_eq!(desired_workers(25, 5), 3);
        assert_eq!(desired_workers(500, 5), 5);
        assert_eq!(desired_workers(10_000, 80), WORKER_CEILING);
    }

    #[tokio::test]
    async fn registration_is_idempotent_by_path() -> TestResult<()> {
        let dispatcher = dispatcher(5)?;
        let owner: Arc<dyn ConversionTarget> = Arc::new(IdleTarget);
        let first = dispatcher.register_file("/in/a.json".into(), stamp(0), &owner);
        let second = dispatcher.register_file("/in/a.json".into(), stamp(5), &owner);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(dispatcher.pending_count(), 1);
        assert_eq!(first.state(), ItemState::Pending);
        assert!(dispatcher.is_tracked(&first));
        Ok(())
    }

    #[tokio::test]
    async fn dequeue_orders_by_modification_time_and_never_double_hands() -> TestResult<()> {
        let dispatcher = dispatcher(5)?;
        let owner: Arc<dyn ConversionTarget> = Arc::new(IdleTarget);
        dispatcher.register_file("/in/new.json".into(), stamp(30), &owner);
        dispatcher.register_file("/in/old.json".into(), stamp(10), &owner);
        dispatcher.register_file("/in/mid.json".into(), stamp(20), &owner);

        let order: Vec<_> = std::iter::from_fn(|| dispatcher.try_dequeue_next(1))
            .map(|item| item.path().to_path_buf())
            .collect();
        assert_eq!(
            order,
            vec![
                PathBuf::from("/in/old.json"),
                PathBuf::from("/in/mid.json"),
                PathBuf::from("/in/new.json"),
            ]
        );
        assert!(dispatcher.try_dequeue_next(2).is_none());
        let item = dispatcher
            .item(Path::new("/in/old.json"))
            .ok_or_else(|| anyhow::anyhow!("item missing"))?;
        assert_eq!(item.state(), ItemState::Processing);
        assert_eq!(item.worker(), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn items_registered_mid_drain_wait_for_next_refill() -> TestResult<()> {
        let dispatcher = dispatcher(5)?;
        let owner: Arc<dyn ConversionTarget> = Arc::new(IdleTarget);
        dispatcher.register_file("/in/b.json".into(), stamp(20), &owner);
        dispatcher.register_file("/in/c.json".into(), stamp(30), &owner);

        let first = dispatcher.try_dequeue_next(1);
        assert_eq!(first.map(|item| item.path().to_path_buf()), Some("/in/b.json".into()));
        dispatcher.register_file("/in/a.json".into(), stamp(10), &owner);

        let second = dispatcher.try_dequeue_next(1);
        assert_eq!(second.map(|item| item.path().to_path_buf()), Some("/in/c.json".into()));
        let third = dispatcher.try_dequeue_next(1);
        assert_eq!(third.map(|item| item.path().to_path_buf()), Some("/in/a.json".into()));
        Ok(())
    }

    #[tokio::test]
    async fn removed_items_are_skipped_and_removal_is_idempotent() -> TestResult<()> {
        let dispatcher = dispatcher(5)?;
        let owner: Arc<dyn ConversionTarget> = Arc::new(IdleTarget);
        let item = dispatcher.register_file("/in/a.json".into(), stamp(0), &owner);
        dispatcher.remove_file(item.path());
        dispatcher.remove_file(item.path());
        assert_eq!(item.state(), ItemState::Done);
        assert!(!dispatcher.is_tracked(&item));
        assert!(dispatcher.try_dequeue_next(1).is_none());

        let again = dispatcher.register_file("/in/a.json".into(), stamp(0), &owner);
        assert!(!Arc::ptr_eq(&item, &again));
        Ok(())
    }

    #[tokio::test]
    async fn stale_items_return_to_pending() -> TestResult<()> {
        let dispatcher = dispatcher(5)?;
        let owner: Arc<dyn ConversionTarget> = Arc::new(IdleTarget);
        dispatcher.register_file("/in/a.json".into(), stamp(0), &owner);
        let item = dispatcher
            .try_dequeue_next(1)
            .ok_or_else(|| anyhow::anyhow!("nothing dequeued"))?;

        assert_eq!(dispatcher.rescue_stale(Duration::from_secs(600)), 0);
        assert_eq!(dispatcher.rescue_stale(Duration::ZERO), 1);
        assert_eq!(item.state(), ItemState::Pending);
        let again = dispatcher.try_dequeue_next(2);
        assert!(again.is_some_and(|next| Arc::ptr_eq(&next, &item)));
        Ok(())
    }

    #[tokio::test]
    async fn orphaned_items_are_purged() -> TestResult<()> {
        let dispatcher = dispatcher(5)?;
        let owner: Arc<dyn ConversionTarget> = Arc::new(IdleTarget);
        dispatcher.register_file("/in/a.json".into(), stamp(0), &owner);
        assert_eq!(dispatcher.purge_orphans(), 0);
        drop(owner);
        assert_eq!(dispatcher.purge_orphans(), 1);
        assert_eq!(dispatcher.pending_count(), 0);
        Ok(())
    }
}
