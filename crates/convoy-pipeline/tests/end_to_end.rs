use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use convoy_core::{ConverterFactory, PollChangeSource, PostProcessAction};
use convoy_events::{Event, EventBus};
use convoy_pipeline::{
    ArchiveGate, ConversionDispatcher, DispatcherSettings, RetryPolicy, RunState, Signals,
    SourceSettings, SourceWatcher, WatcherDeps, WorkerTuning,
};
use convoy_telemetry::Metrics;
use convoy_test_support::fixtures::{
    file_names, wait_until, wait_until_async, write_file, write_json_of_size,
};
use convoy_test_support::mocks::{RecordingSubmissionApi, StubBehavior, StubConverterFactory};
use globset::Glob;
use tempfile::TempDir;
use zip::ZipArchive;

type TestResult<T> = anyhow::Result<T>;

const PATIENCE: Duration = Duration::from_secs(10);

struct Harness {
    dispatcher: ConversionDispatcher,
    watcher: Arc<SourceWatcher>,
    events: EventBus,
    api: Arc<RecordingSubmissionApi>,
}

impl Harness {
    fn new(
        dir: &Path,
        max_workers: usize,
        factory: StubConverterFactory,
        action: PostProcessAction,
    ) -> TestResult<Self> {
        let events = EventBus::new();
        let signals = Signals::new(events.clone(), Metrics::new()?);
        let dispatcher = ConversionDispatcher::new(
            DispatcherSettings {
                max_workers,
                stale_after: Duration::from_secs(600),
                shutdown_grace: Duration::from_secs(5),
                tuning: WorkerTuning {
                    idle_poll: Duration::from_millis(20),
                    flush_after_idle_polls: 5,
                    exit_after_idle_polls: 500,
                },
            },
            signals.clone(),
        )?;

        let fast = RetryPolicy {
            budget: Duration::from_millis(500),
            interval: Duration::from_millis(25),
        };
        let factory: Arc<dyn ConverterFactory> = Arc::new(factory);
        let mut settings = SourceSettings::new(
            "bench-a",
            dir.to_path_buf(),
            Glob::new("*.json")?.compile_matcher(),
            factory,
            action,
        );
        settings.lock_policy = fast;
        settings.post_process_policy = fast;
        settings.settle = Duration::from_millis(10);

        let api = Arc::new(RecordingSubmissionApi::accepting());
        let watcher = SourceWatcher::new(
            settings,
            WatcherDeps {
                dispatcher: dispatcher.clone(),
                api: api.clone(),
                changes: Arc::new(PollChangeSource::new(Duration::from_millis(50))),
                gate: ArchiveGate::new(),
                signals,
            },
        );
        Ok(Self {
            dispatcher,
            watcher,
            events,
            api,
        })
    }

    fn events(&self) -> Vec<Event> {
        self.events
            .backlog_since(0)
            .into_iter()
            .map(|envelope| envelope.event)
            .collect()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn discovered_file_is_converted_and_deleted() -> TestResult<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(
        dir.path(),
        2,
        StubConverterFactory::new(StubBehavior::Report),
        PostProcessAction::Delete,
    )?;
    harness.watcher.start().await?;
    assert_eq!(harness.watcher.state(), RunState::Running);

    let path = write_json_of_size(dir.path(), "run-001.json", 10 * 1024)?;
    wait_until(PATIENCE, "file deletion", || !path.exists()).await?;
    wait_until(PATIENCE, "registry drain", || harness.dispatcher.pending_count() == 0).await?;

    assert!(harness.dispatcher.item(&path).is_none());
    assert_eq!(harness.api.reports().len(), 1);
    assert!(harness.events().iter().any(|event| matches!(
        event,
        Event::ConversionCompleted { disposition, .. } if disposition == "Delete"
    )));
    harness.dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn backlog_sizes_pool_to_one_worker_per_ten_items() -> TestResult<()> {
    let dir = TempDir::new()?;
    for i in 0..25 {
        write_file(dir.path(), &format!("burst-{i:02}.json"), b"{}")?;
    }
    let harness = Harness::new(
        dir.path(),
        5,
        StubConverterFactory::new(StubBehavior::Block(Duration::from_millis(300))),
        PostProcessAction::Delete,
    )?;
    harness.watcher.start().await?;

    assert_eq!(harness.dispatcher.active_workers(), 3);
    wait_until(PATIENCE * 2, "backlog drain", || harness.dispatcher.pending_count() == 0).await?;
    assert!(file_names(dir.path())?.is_empty());

    let peak = harness
        .events()
        .iter()
        .filter_map(|event| match event {
            Event::WorkersResized { active, .. } => Some(*active),
            _ => None,
        })
        .max();
    assert_eq!(peak, Some(3));
    harness.dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_converter_routes_file_to_error_folder() -> TestResult<()> {
    let dir = TempDir::new()?;
    let errors = dir.path().join("Error");
    fs::create_dir_all(&errors)?;
    write_file(&errors, "clash.json", b"earlier")?;
    let fresh = write_file(dir.path(), "fresh.json", b"{}")?;
    let clash = write_file(dir.path(), "clash.json", b"{}")?;

    let factory = StubConverterFactory::new(StubBehavior::Fail);
    let counters = factory.counters();
    let harness = Harness::new(dir.path(), 1, factory, PostProcessAction::Delete)?;
    harness.watcher.start().await?;

    wait_until(PATIENCE, "registry drain", || harness.dispatcher.pending_count() == 0).await?;
    assert!(!fresh.exists() && !clash.exists());
    assert!(harness.dispatcher.item(&fresh).is_none());

    let names = file_names(&errors)?;
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"fresh.json".to_string()));
    assert!(names.iter().any(|name| {
        name.starts_with("clash.") && name.ends_with(".json") && name.len() == "clash..json".len() + 8
    }));
    assert_eq!(fs::read(errors.join("clash.json"))?, b"earlier");
    assert_eq!(counters.imports(), 2);
    assert_eq!(counters.cleanups(), 2);
    assert!(harness.api.reports().is_empty());
    harness.dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_converter_still_cleans_up_and_keeps_the_pool_alive() -> TestResult<()> {
    let dir = TempDir::new()?;
    let path = write_file(dir.path(), "boom.json", b"{}")?;
    let factory = StubConverterFactory::new(StubBehavior::Panic);
    let counters = factory.counters();
    let harness = Harness::new(dir.path(), 1, factory, PostProcessAction::Move)?;
    harness.watcher.start().await?;

    wait_until(PATIENCE, "registry drain", || harness.dispatcher.pending_count() == 0).await?;
    assert!(!path.exists());
    assert!(dir.path().join("Error").join("boom.json").exists());
    assert_eq!(counters.cleanups(), 1);

    let next = write_file(dir.path(), "next.json", b"{}")?;
    wait_until(PATIENCE, "second conversion", || !next.exists()).await?;
    harness.dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn discarded_reports_follow_the_configured_action() -> TestResult<()> {
    let dir = TempDir::new()?;
    let path = write_file(dir.path(), "empty.json", b"{}")?;
    let harness = Harness::new(
        dir.path(),
        1,
        StubConverterFactory::new(StubBehavior::Discard),
        PostProcessAction::Move,
    )?;
    harness.watcher.start().await?;

    wait_until(PATIENCE, "move into Done", || dir.path().join("Done").join("empty.json").exists()).await?;
    assert!(!path.exists());
    assert!(harness.api.reports().is_empty());
    harness.dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn archived_files_land_in_the_monthly_bundle_exactly_once() -> TestResult<()> {
    let dir = TempDir::new()?;
    let names: Vec<String> = (0..14).map(|i| format!("cycle-{i:02}.json")).collect();
    for name in &names {
        write_file(dir.path(), name, name.as_bytes())?;
    }
    let harness = Harness::new(
        dir.path(),
        2,
        StubConverterFactory::new(StubBehavior::Report),
        PostProcessAction::Archive,
    )?;
    harness.watcher.start().await?;
    wait_until(PATIENCE, "registry drain", || harness.dispatcher.pending_count() == 0).await?;

    let done = dir.path().join("Done");
    let dispatcher = harness.dispatcher.clone();
    let bundle_dir = done.clone();
    wait_until_async(PATIENCE, "archive flush", move || {
        let dispatcher = dispatcher.clone();
        let bundle_dir = bundle_dir.clone();
        async move {
            dispatcher.flush_archives().await;
            file_names(&bundle_dir).is_ok_and(|files| files.len() == 1 && files[0].ends_with(".zip"))
        }
    })
    .await?;

    let bundle: PathBuf = done.join(&file_names(&done)?[0]);
    let archive = ZipArchive::new(File::open(&bundle)?)?;
    let mut entries: Vec<String> = archive.file_names().map(str::to_string).collect();
    entries.sort();
    assert_eq!(entries, names);
    assert_eq!(harness.watcher.archive_backlog(), 0);
    harness.dispatcher.shutdown().await;
    Ok(())
}
