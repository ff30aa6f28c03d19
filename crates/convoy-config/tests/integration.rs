use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};

use convoy_config::{ConfigError, ConfigWatcher, load};
use convoy_core::PostProcessAction;
use tempfile::TempDir;
use tokio::time::timeout;

type TestResult<T> = anyhow::Result<T>;

const BASE: &str = r"
max_workers: 5
reports_dir: reports
collector:
  base_url: https://collector.example.com
  token: secret
logging:
  level: debug
  format: json
sources:
  - name: line-1
    path: inbox
    filter: '*.json'
    post_process_action: zip
    destination_params:
      station: A
  - name: line-2
    path: /var/lib/convoy/line-2
    filter: '*.csv'
    converter: json
";

fn write_with_stamp(path: &Path, contents: &str, offset_secs: u64) -> TestResult<()> {
    fs::write(path, contents)?;
    let stamp = SystemTime::now() + Duration::from_secs(offset_secs);
    File::options().write(true).open(path)?.set_modified(stamp)?;
    Ok(())
}

#[test]
fn load_reads_full_document() -> TestResult<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("convoy.yaml");
    fs::write(&path, BASE)?;

    let config = load(&path)?;
    assert_eq!(config.max_workers, 5);
    assert_eq!(config.reports_dir, dir.path().join("reports"));
    assert_eq!(config.sources.len(), 2);
    assert_eq!(
        config.sources[0].post_process_action()?,
        PostProcessAction::Archive
    );
    assert_eq!(
        config.sources[1].post_process_action()?,
        PostProcessAction::Delete
    );
    assert_eq!(config.sources[0].destination_params["station"], "A");
    assert!(config.sources[0].matcher()?.is_match("report.json"));
    let collector = config
        .collector
        .ok_or_else(|| anyhow::anyhow!("collector missing"))?;
    assert_eq!(collector.timeout_secs, 100);
    assert_eq!(collector.token.as_deref(), Some("secret"));
    Ok(())
}

#[test]
fn load_reports_missing_file() {
    let result = load(Path::new("/nonexistent/convoy.yaml"));
    assert!(matches!(result, Err(ConfigError::Io { .. })));
}

#[tokio::test]
async fn watcher_emits_new_revision_and_survives_invalid_edit() -> TestResult<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("convoy.yaml");
    fs::write(&path, BASE)?;

    let (initial, watcher) = ConfigWatcher::open(&path).await?;
    let mut watcher =
        watcher.with_intervals(Duration::from_millis(20), Duration::from_millis(20));
    assert_eq!(initial.revision, 1);
    assert_eq!(initial.config.max_workers, 5);

    write_with_stamp(&path, &BASE.replace("max_workers: 5", "max_workers: 99"), 10)?;
    let result = timeout(Duration::from_secs(5), watcher.next()).await?;
    assert!(matches!(result, Err(ConfigError::InvalidField { .. })));

    write_with_stamp(&path, &BASE.replace("max_workers: 5", "max_workers: 7"), 20)?;
    let snapshot = timeout(Duration::from_secs(5), watcher.next()).await??;
    assert_eq!(snapshot.revision, 2);
    assert_eq!(snapshot.config.max_workers, 7);
    Ok(())
}
