use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use convoy_app::{BootstrapDependencies, SupervisorSettings, serve};
use convoy_core::PollChangeSource;
use convoy_events::Event;
use convoy_pipeline::{DispatcherSettings, WorkerTuning};
use convoy_test_support::fixtures::{file_names, wait_until, write_file};
use tempfile::TempDir;
use tokio::sync::oneshot;

type TestResult<T> = anyhow::Result<T>;

const CONFIG: &str = "\
max_workers: 2
reports_dir: reports
status_path: state/status.json
sources:
  - name: line-1
    path: inbox
    filter: '*.json'
    post_process_action: move
";

async fn dependencies(config_path: &Path) -> TestResult<BootstrapDependencies> {
    Ok(BootstrapDependencies::load(config_path)
        .await?
        .with_change_source(Arc::new(PollChangeSource::new(Duration::from_millis(50))))
        .with_dispatcher_settings(DispatcherSettings {
            tuning: WorkerTuning {
                idle_poll: Duration::from_millis(20),
                flush_after_idle_polls: 5,
                exit_after_idle_polls: 500,
            },
            ..DispatcherSettings::default()
        })
        .with_schedule(
            SupervisorSettings {
                housekeeping_interval: Duration::from_millis(200),
                ping_interval: Duration::from_secs(3600),
            },
            Duration::from_secs(3600),
        )
        .with_reload_intervals(Duration::from_millis(50), Duration::from_millis(50)))
}

fn status_field(path: &Path, field: &str) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value[field].as_str().map(str::to_string)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn agent_converts_queues_and_stops_cleanly() -> TestResult<()> {
    let dir = TempDir::new()?;
    let config_path = write_file(dir.path(), "convoy.yaml", CONFIG.as_bytes())?;
    let inbox = dir.path().join("inbox");
    std::fs::create_dir_all(&inbox)?;
    write_file(&inbox, "a.json", br#"{"serial":"SN-1"}"#)?;
    let status = dir.path().join("state").join("status.json");

    let deps = dependencies(&config_path).await?;
    assert!(deps.config().collector.is_none());
    let (stop, stopped) = oneshot::channel::<()>();
    let agent = tokio::spawn(serve(deps, async move {
        let _ = stopped.await;
    }));

    let done = inbox.join("Done").join("a.json");
    wait_until(Duration::from_secs(10), "file moved to Done", || done.exists()).await?;
    wait_until(Duration::from_secs(5), "report queued", || {
        file_names(&dir.path().join("reports"))
            .is_ok_and(|names| names.len() == 1 && names[0].ends_with(".Queued"))
    })
    .await?;
    wait_until(Duration::from_secs(5), "status snapshot", || {
        status_field(&status, "client_status").as_deref() == Some("Not Registered")
    })
    .await?;

    let _ = stop.send(());
    tokio::time::timeout(Duration::from_secs(30), agent).await???;
    assert_eq!(status_field(&status, "service_state").as_deref(), Some("stopped"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn configuration_edits_are_applied_and_bad_edits_rejected() -> TestResult<()> {
    let dir = TempDir::new()?;
    let config_path = write_file(dir.path(), "convoy.yaml", CONFIG.as_bytes())?;
    std::fs::create_dir_all(dir.path().join("inbox"))?;
    let extra = dir.path().join("extra");
    std::fs::create_dir_all(&extra)?;
    write_file(&extra, "b.json", br#"{"serial":"SN-2"}"#)?;

    let deps = dependencies(&config_path).await?;
    let events = deps.events().clone();
    let (stop, stopped) = oneshot::channel::<()>();
    let agent = tokio::spawn(serve(deps, async move {
        let _ = stopped.await;
    }));
    wait_until(Duration::from_secs(5), "agent running", || {
        events.backlog_since(0).iter().any(|envelope| {
            matches!(&envelope.event, Event::ServiceStateChanged { state } if state == "running")
        })
    })
    .await?;

    tokio::time::sleep(Duration::from_millis(20)).await;
    let extended = format!(
        "{CONFIG}  - name: extra\n    path: extra\n    filter: '*.json'\n    post_process_action: move\n"
    );
    std::fs::write(&config_path, extended)?;
    let done = extra.join("Done").join("b.json");
    wait_until(Duration::from_secs(10), "added source converted", || done.exists()).await?;
    assert!(events.backlog_since(0).iter().any(|envelope| matches!(
        envelope.event,
        Event::SettingsChanged { .. }
    )));

    tokio::time::sleep(Duration::from_millis(20)).await;
    std::fs::write(&config_path, "max_workers: 0\n")?;
    wait_until(Duration::from_secs(10), "rejected edit reported", || {
        events.backlog_since(0).iter().any(|envelope| {
            matches!(&envelope.event, Event::HealthChanged { degraded } if degraded == &["config_watcher".to_string()])
        })
    })
    .await?;

    let _ = stop.send(());
    tokio::time::timeout(Duration::from_secs(30), agent).await???;
    Ok(())
}
