//! Configuration document model.

use std::path::{Path, PathBuf};

use convoy_core::{Parameters, PostProcessAction};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Hard ceiling on concurrent conversion workers.
pub const MAX_WORKER_CEILING: usize = 50;

const DEFAULT_CONVERTER: &str = "json";
const DEFAULT_TIMEOUT_SECS: u64 = 100;

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Upper bound for the conversion worker pool.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Directory backing the durable report queue.
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
    /// Where the status snapshot is written.
    #[serde(default = "default_status_path")]
    pub status_path: PathBuf,
    /// Remote collector endpoint; absent means the agent is not registered.
    #[serde(default)]
    pub collector: Option<CollectorConfig>,
    /// Logging preferences.
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Watched sources.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// Remote collector endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CollectorConfig {
    /// Base URL, e.g. `https://collector.example.com`.
    pub base_url: String,
    /// Bearer token sent with every request.
    #[serde(default)]
    pub token: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Logging preferences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    /// Filter directive; `CONVOY_LOG` or `RUST_LOG` take precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json` or `pretty`; inferred from the build when absent.
    #[serde(default)]
    pub format: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: None,
        }
    }
}

/// One watched directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Unique source name.
    pub name: String,
    /// Watched directory.
    pub path: PathBuf,
    /// File name glob, e.g. `*.json`.
    pub filter: String,
    /// Converter registry name.
    #[serde(default = "default_converter")]
    pub converter: String,
    /// Raw post-process action text; see [`SourceConfig::post_process_action`].
    #[serde(default)]
    pub post_process_action: Option<String>,
    /// Parameters describing the source.
    #[serde(default)]
    pub source_params: Parameters,
    /// Parameters handed to the converter for produced reports.
    #[serde(default)]
    pub destination_params: Parameters,
}

impl SourceConfig {
    /// Resolved post-process action.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] naming the source when the text is unrecognised.
    pub fn post_process_action(&self) -> ConfigResult<PostProcessAction> {
        PostProcessAction::from_config(self.post_process_action.as_deref()).map_err(|_| {
            ConfigError::invalid(
                self.name.clone(),
                "post_process_action",
                self.post_process_action.clone(),
                "unknown_action",
            )
        })
    }

    /// Compiled file name matcher for the filter glob.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when the glob does not compile.
    pub fn matcher(&self) -> ConfigResult<GlobMatcher> {
        Glob::new(&self.filter)
            .map(|glob| glob.compile_matcher())
            .map_err(|_| {
                ConfigError::invalid(
                    self.name.clone(),
                    "filter",
                    Some(self.filter.clone()),
                    "invalid_glob",
                )
            })
    }
}

impl AgentConfig {
    /// Resolve relative paths against the directory holding the configuration file.
    #[must_use]
    pub fn resolved_against(mut self, base: &Path) -> Self {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.reports_dir);
        resolve(&mut self.status_path);
        for source in &mut self.sources {
            resolve(&mut source.path);
        }
        self
    }
}

/// Loaded configuration tagged with a monotonically increasing revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    /// Revision number; the first load is revision 1.
    pub revision: u64,
    /// Validated configuration.
    pub config: AgentConfig,
}

const fn default_max_workers() -> usize {
    1
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_status_path() -> PathBuf {
    PathBuf::from("status.json")
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_converter() -> String {
    DEFAULT_CONVERTER.to_string()
}
