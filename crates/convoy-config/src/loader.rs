//! File-backed configuration loading and change watching.
//!
//! # Design
//! - The YAML document is parsed, resolved against its own directory, then validated.
//! - `ConfigWatcher` polls the file's modification stamp; a change is debounced before the new
//!   document is read so half-written files are not picked up.
//! - A failed reload surfaces an error once per change and keeps the previous revision.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::time::sleep;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{AgentConfig, ConfigSnapshot};
use crate::validate::validate;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "CONVOY_CONFIG";
/// Configuration file used when the environment does not name one.
pub const DEFAULT_CONFIG_PATH: &str = "convoy.yaml";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Configuration path from [`CONFIG_PATH_ENV`], or [`DEFAULT_CONFIG_PATH`].
#[must_use]
pub fn config_path_from_env() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .filter(|value| !value.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Parse and validate a YAML document; relative paths resolve against `base`.
///
/// # Errors
///
/// Returns a parse error for malformed YAML or a validation error for bad values.
pub fn parse(text: &str, origin: &Path, base: &Path) -> ConfigResult<AgentConfig> {
    let config: AgentConfig =
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
    let config = config.resolved_against(base);
    validate(&config)?;
    Ok(config)
}

/// Read, parse and validate the configuration file at `path`.
///
/// # Errors
///
/// Returns an IO error when the file is unreadable, otherwise see [`parse`].
pub fn load(path: &Path) -> ConfigResult<AgentConfig> {
    let text =
        std::fs::read_to_string(path).map_err(|err| ConfigError::io("config.read", path, err))?;
    parse(&text, path, &base_dir(path))
}

async fn load_async(path: &Path) -> ConfigResult<AgentConfig> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| ConfigError::io("config.read", path, err))?;
    parse(&text, path, &base_dir(path))
}

fn base_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

async fn modified_stamp(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .and_then(|metadata| metadata.modified())
        .ok()
}

/// Watches the configuration file for edits.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    poll_interval: Duration,
    settle: Duration,
    last_stamp: Option<SystemTime>,
    revision: u64,
}

impl ConfigWatcher {
    /// Load the initial snapshot (revision 1) and start tracking the file.
    ///
    /// # Errors
    ///
    /// Returns an error when the initial document is unreadable or invalid.
    pub async fn open(path: impl Into<PathBuf>) -> ConfigResult<(ConfigSnapshot, Self)> {
        let path = path.into();
        let last_stamp = modified_stamp(&path).await;
        let config = load_async(&path).await?;
        let watcher = Self {
            path,
            poll_interval: DEFAULT_POLL_INTERVAL,
            settle: DEFAULT_SETTLE,
            last_stamp,
            revision: 1,
        };
        Ok((
            ConfigSnapshot {
                revision: 1,
                config,
            },
            watcher,
        ))
    }

    /// Override the polling cadence and debounce window.
    #[must_use]
    pub const fn with_intervals(mut self, poll_interval: Duration, settle: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.settle = settle;
        self
    }

    /// Path being watched.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Await the next configuration snapshot after the file changes.
    ///
    /// # Errors
    ///
    /// Returns an error when the changed document is unreadable or invalid; the watcher keeps
    /// running and reports the next change.
    pub async fn next(&mut self) -> ConfigResult<ConfigSnapshot> {
        loop {
            sleep(self.poll_interval).await;
            let stamp = modified_stamp(&self.path).await;
            if stamp.is_none() || stamp == self.last_stamp {
                continue;
            }

            debug!(path = %self.path.display(), "configuration change detected");
            sleep(self.settle).await;
            self.last_stamp = modified_stamp(&self.path).await.or(stamp);

            let config = load_async(&self.path).await?;
            self.revision += 1;
            return Ok(ConfigSnapshot {
                revision: self.revision,
                config,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_dir_defaults_to_current_directory() {
        assert_eq!(base_dir(Path::new("convoy.yaml")), PathBuf::from("."));
        assert_eq!(
            base_dir(Path::new("/etc/convoy/convoy.yaml")),
            PathBuf::from("/etc/convoy")
        );
    }

    #[test]
    fn parse_applies_defaults_and_resolves_paths() -> ConfigResult<()> {
        let yaml = "sources:\n  - name: line-1\n    path: inbox\n    filter: '*.json'\n";
        let config = parse(yaml, Path::new("/etc/convoy/convoy.yaml"), Path::new("/etc/convoy"))?;
        assert_eq!(config.max_workers, 1);
        assert_eq!(config.reports_dir, PathBuf::from("/etc/convoy/reports"));
        assert_eq!(config.sources[0].path, PathBuf::from("/etc/convoy/inbox"));
        assert_eq!(config.sources[0].converter, "json");
        assert!(config.collector.is_none());
        Ok(())
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let result = parse(
            "max_worker: 3\n",
            Path::new("convoy.yaml"),
            Path::new("."),
        );
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
