//! Conversion plugin contract and the registry that resolves plugins by name.
//!
//! # Design
//! - Plugins are resolved once, when configuration is loaded; unknown names fail early.
//! - Each conversion gets a fresh converter instance from its factory and a fresh
//!   [`ConversionContext`], both discarded afterwards.
//! - Conversion itself is synchronous; callers run it on a blocking thread.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::model::{Parameters, Report};

/// Per-conversion context handed to a converter.
#[derive(Debug, Clone)]
pub struct ConversionContext {
    source_path: PathBuf,
    source_params: Parameters,
    destination_params: Parameters,
}

impl ConversionContext {
    /// Build a context for one source file.
    #[must_use]
    pub const fn new(
        source_path: PathBuf,
        source_params: Parameters,
        destination_params: Parameters,
    ) -> Self {
        Self {
            source_path,
            source_params,
            destination_params,
        }
    }

    /// Absolute path of the file being converted.
    #[must_use]
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Parameters configured for the watched source.
    #[must_use]
    pub const fn source_params(&self) -> &Parameters {
        &self.source_params
    }

    /// Parameters configured for the produced reports.
    #[must_use]
    pub const fn destination_params(&self) -> &Parameters {
        &self.destination_params
    }
}

/// A single-use converter instance.
pub trait ReportConverter: Send {
    /// Convert the input stream into a report; `Ok(None)` discards the file without a report.
    ///
    /// # Errors
    ///
    /// Returns an error when the input cannot be converted.
    fn import_report(
        &mut self,
        context: &ConversionContext,
        input: &mut dyn Read,
    ) -> CoreResult<Option<Report>>;

    /// Release resources held by the instance. Always invoked after `import_report`.
    fn clean_up(&mut self) {}
}

/// Factory producing converter instances for one plugin type.
pub trait ConverterFactory: Send + Sync {
    /// Registry name of the plugin.
    fn name(&self) -> &str;

    /// Version string reported in status snapshots.
    fn version(&self) -> &str;

    /// Create a fresh converter configured with the destination parameters.
    ///
    /// # Errors
    ///
    /// Returns an error when the parameters are unusable.
    fn create(&self, destination_params: &Parameters) -> CoreResult<Box<dyn ReportConverter>>;
}

/// Capability-typed registry of converter factories.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    factories: BTreeMap<String, Arc<dyn ConverterFactory>>,
}

impl ConverterRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the converters shipped with the agent.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .factories
            .insert(JSON_CONVERTER.to_string(), Arc::new(JsonConverterFactory));
        registry
    }

    /// Register a factory under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateConverter`] when the name is taken.
    pub fn register(&mut self, factory: Arc<dyn ConverterFactory>) -> CoreResult<()> {
        let name = factory.name().to_string();
        if self.factories.contains_key(&name) {
            return Err(CoreError::DuplicateConverter { name });
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a factory by name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownConverter`] when nothing is registered under `name`.
    pub fn resolve(&self, name: &str) -> CoreResult<Arc<dyn ConverterFactory>> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownConverter {
                name: name.to_string(),
            })
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

const JSON_CONVERTER: &str = "json";

struct JsonConverterFactory;

impl ConverterFactory for JsonConverterFactory {
    fn name(&self) -> &str {
        JSON_CONVERTER
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn create(&self, destination_params: &Parameters) -> CoreResult<Box<dyn ReportConverter>> {
        Ok(Box::new(JsonReportConverter {
            defaults: destination_params.clone(),
        }))
    }
}

/// Passthrough converter for files that already contain a JSON report body.
///
/// Destination parameters are merged into the payload as defaults for missing top-level keys.
/// An empty file produces no report.
struct JsonReportConverter {
    defaults: Parameters,
}

impl ReportConverter for JsonReportConverter {
    fn import_report(
        &mut self,
        context: &ConversionContext,
        input: &mut dyn Read,
    ) -> CoreResult<Option<Report>> {
        let mut text = String::new();
        input
            .read_to_string(&mut text)
            .map_err(|err| CoreError::io("json_converter.read", context.source_path(), err))?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        let mut payload: Value = serde_json::from_str(&text)
            .map_err(|err| CoreError::conversion(JSON_CONVERTER, err))?;
        let Value::Object(map) = &mut payload else {
            return Err(CoreError::conversion(
                JSON_CONVERTER,
                "top-level JSON value must be an object",
            ));
        };
        for (key, value) in &self.defaults {
            map.entry(key.clone())
                .or_insert_with(|| Value::String(value.clone()));
        }

        let report =
            Report::new(payload).with_origin(context.source_path().to_string_lossy().into_owned());
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn context() -> ConversionContext {
        ConversionContext::new(
            PathBuf::from("/data/in/a.json"),
            Parameters::new(),
            Parameters::new(),
        )
    }

    #[test]
    fn registry_resolves_builtins_and_rejects_unknown() -> CoreResult<()> {
        let registry = ConverterRegistry::with_builtins();
        let factory = registry.resolve("json")?;
        assert_eq!(factory.name(), "json");
        assert!(matches!(
            registry.resolve("csv"),
            Err(CoreError::UnknownConverter { .. })
        ));
        Ok(())
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let mut registry = ConverterRegistry::with_builtins();
        let result = registry.register(Arc::new(JsonConverterFactory));
        assert!(matches!(result, Err(CoreError::DuplicateConverter { .. })));
        assert_eq!(registry.names(), vec!["json"]);
    }

    #[test]
    fn json_converter_merges_destination_defaults() -> CoreResult<()> {
        let mut defaults = Parameters::new();
        defaults.insert("station".into(), "line-1".into());
        defaults.insert("serial".into(), "ignored".into());
        let mut converter = JsonConverterFactory.create(&defaults)?;

        let mut input = Cursor::new(br#"{"serial":"SN-1"}"#.to_vec());
        let report = converter
            .import_report(&context(), &mut input)?
            .ok_or(CoreError::InvalidReport {
                field: "report",
                reason: "missing",
            })?;
        assert_eq!(report.payload["serial"], "SN-1");
        assert_eq!(report.payload["station"], "line-1");
        assert_eq!(report.origin.as_deref(), Some("/data/in/a.json"));
        converter.clean_up();
        Ok(())
    }

    #[test]
    fn json_converter_discards_empty_input_and_rejects_garbage() -> CoreResult<()> {
        let mut converter = JsonConverterFactory.create(&Parameters::new())?;
        let mut empty = Cursor::new(Vec::new());
        assert!(converter.import_report(&context(), &mut empty)?.is_none());

        let mut garbage = Cursor::new(b"not json".to_vec());
        assert!(matches!(
            converter.import_report(&context(), &mut garbage),
            Err(CoreError::Conversion { .. })
        ));

        let mut array = Cursor::new(b"[1]".to_vec());
        assert!(converter.import_report(&context(), &mut array).is_err());
        Ok(())
    }
}
