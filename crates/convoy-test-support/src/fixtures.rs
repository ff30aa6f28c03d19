//! Filesystem fixtures and polling helpers.

use std::fs::{self, File, FileTimes};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Result, bail};

/// Write `contents` to `dir/name` and return the path.
///
/// # Errors
///
/// Returns an error when the file cannot be written.
pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, contents)?;
    Ok(path)
}

/// Write a JSON object padded to roughly `size` bytes.
///
/// # Errors
///
/// Returns an error when the file cannot be written.
pub fn write_json_of_size(dir: &Path, name: &str, size: usize) -> Result<PathBuf> {
    let padding = "x".repeat(size.saturating_sub(16));
    let body = serde_json::json!({ "padding": padding });
    write_file(dir, name, body.to_string().as_bytes())
}

/// Push both access and modification stamps of `path` `age` into the past.
///
/// # Errors
///
/// Returns an error when the stamps cannot be changed.
pub fn age_file(path: &Path, age: Duration) -> Result<()> {
    let stamp = SystemTime::now()
        .checked_sub(age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let file = File::options().write(true).open(path)?;
    file.set_times(FileTimes::new().set_accessed(stamp).set_modified(stamp))?;
    Ok(())
}

/// Names of the regular files directly under `dir`, sorted.
///
/// # Errors
///
/// Returns an error when the directory cannot be listed.
pub fn file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Poll `condition` every 20 ms until it holds or `timeout` elapses.
///
/// # Errors
///
/// Returns an error naming `what` when the deadline passes.
pub async fn wait_until<F>(timeout: Duration, what: &str, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Async variant of [`wait_until`].
///
/// # Errors
///
/// Returns an error naming `what` when the deadline passes.
pub async fn wait_until_async<F, Fut>(timeout: Duration, what: &str, mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aged_files_report_old_stamps() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("convoy-fixture-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        let path = write_json_of_size(&dir, "big.json", 10 * 1024)?;
        assert!(fs::metadata(&path)?.len() >= 10 * 1024 - 16);

        age_file(&path, Duration::from_secs(40 * 60))?;
        let modified = fs::metadata(&path)?.modified()?;
        let age = SystemTime::now().duration_since(modified)?;
        assert!(age >= Duration::from_secs(39 * 60));
        assert_eq!(file_names(&dir)?, vec!["big.json".to_string()]);
        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[tokio::test]
    async fn wait_until_times_out() {
        let result = wait_until(Duration::from_millis(50), "never", || false).await;
        assert!(result.is_err());
        assert!(wait_until(Duration::from_millis(50), "now", || true).await.is_ok());
    }
}
