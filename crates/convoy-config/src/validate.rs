//! Validation of a parsed configuration document.

use std::collections::HashSet;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{AgentConfig, MAX_WORKER_CEILING};

const AGENT_SECTION: &str = "agent";
const COLLECTOR_SECTION: &str = "collector";

/// Check every invariant the runtime relies on.
///
/// # Errors
///
/// Returns the first [`ConfigError::InvalidField`] encountered.
pub fn validate(config: &AgentConfig) -> ConfigResult<()> {
    if !(1..=MAX_WORKER_CEILING).contains(&config.max_workers) {
        return Err(ConfigError::invalid(
            AGENT_SECTION,
            "max_workers",
            Some(config.max_workers.to_string()),
            "out_of_range",
        ));
    }
    if config.reports_dir.as_os_str().is_empty() {
        return Err(ConfigError::invalid(
            AGENT_SECTION,
            "reports_dir",
            None,
            "empty",
        ));
    }

    if let Some(collector) = &config.collector {
        let url = collector.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                COLLECTOR_SECTION,
                "base_url",
                Some(collector.base_url.clone()),
                "unsupported_scheme",
            ));
        }
        if collector.timeout_secs == 0 {
            return Err(ConfigError::invalid(
                COLLECTOR_SECTION,
                "timeout_secs",
                Some("0".into()),
                "must_be_positive",
            ));
        }
    }

    let mut names = HashSet::new();
    for source in &config.sources {
        if source.name.trim().is_empty() {
            return Err(ConfigError::invalid(AGENT_SECTION, "sources.name", None, "empty"));
        }
        if !names.insert(source.name.as_str()) {
            return Err(ConfigError::invalid(
                source.name.clone(),
                "name",
                Some(source.name.clone()),
                "duplicate",
            ));
        }
        if source.path.as_os_str().is_empty() {
            return Err(ConfigError::invalid(source.name.clone(), "path", None, "empty"));
        }
        if source.filter.trim().is_empty() {
            return Err(ConfigError::invalid(source.name.clone(), "filter", None, "empty"));
        }
        if source.converter.trim().is_empty() {
            return Err(ConfigError::invalid(
                source.name.clone(),
                "converter",
                None,
                "empty",
            ));
        }
        source.matcher()?;
        source.post_process_action()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CollectorConfig, LoggingSettings, SourceConfig};
    use std::path::PathBuf;

    fn source(name: &str) -> SourceConfig {
        SourceConfig {
            name: name.into(),
            path: PathBuf::from("/data/in"),
            filter: "*.json".into(),
            converter: "json".into(),
            post_process_action: None,
            source_params: Default::default(),
            destination_params: Default::default(),
        }
    }

    fn config(sources: Vec<SourceConfig>) -> AgentConfig {
        AgentConfig {
            max_workers: 5,
            reports_dir: PathBuf::from("/data/reports"),
            status_path: PathBuf::from("/data/status.json"),
            collector: Some(CollectorConfig {
                base_url: "https://collector.example.com".into(),
                token: None,
                timeout_secs: 100,
            }),
            logging: LoggingSettings::default(),
            sources,
        }
    }

    fn reason(result: ConfigResult<()>) -> Option<(&'static str, &'static str)> {
        match result {
            Err(ConfigError::InvalidField { field, reason, .. }) => Some((field, reason)),
            _ => None,
        }
    }

    #[test]
    fn accepts_valid_configuration() {
        assert!(validate(&config(vec![source("a"), source("b")])).is_ok());
    }

    #[test]
    fn rejects_worker_bounds() {
        let mut cfg = config(vec![]);
        cfg.max_workers = 0;
        assert_eq!(reason(validate(&cfg)), Some(("max_workers", "out_of_range")));
        cfg.max_workers = 51;
        assert_eq!(reason(validate(&cfg)), Some(("max_workers", "out_of_range")));
        cfg.max_workers = 50;
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn rejects_duplicate_and_empty_sources() {
        assert_eq!(
            reason(validate(&config(vec![source("a"), source("a")]))),
            Some(("name", "duplicate"))
        );
        let mut blank = source("a");
        blank.filter = " ".into();
        assert_eq!(
            reason(validate(&config(vec![blank]))),
            Some(("filter", "empty"))
        );
        assert_eq!(
            reason(validate(&config(vec![source("")]))),
            Some(("sources.name", "empty"))
        );
    }

    #[test]
    fn rejects_bad_glob_and_action() {
        let mut glob = source("a");
        glob.filter = "[".into();
        assert_eq!(
            reason(validate(&config(vec![glob]))),
            Some(("filter", "invalid_glob"))
        );

        let mut action = source("a");
        action.post_process_action = Some("shred".into());
        assert_eq!(
            reason(validate(&config(vec![action]))),
            Some(("post_process_action", "unknown_action"))
        );
    }

    #[test]
    fn rejects_non_http_collector() {
        let mut cfg = config(vec![]);
        if let Some(collector) = cfg.collector.as_mut() {
            collector.base_url = "ftp://collector".into();
        }
        assert_eq!(
            reason(validate(&cfg)),
            Some(("base_url", "unsupported_scheme"))
        );
    }
}
