//! Stub converters and a recording submission API.

use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use convoy_core::{
    ApiStatus, ConversionContext, ConverterFactory, CoreError, CoreResult, Parameters, Report,
    ReportConverter, SubmissionApi, SubmitMethod,
};
use serde_json::json;

/// What a [`StubConverterFactory`] converter does with each file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubBehavior {
    /// Produce a small report.
    Report,
    /// Produce no report.
    Discard,
    /// Return a conversion error.
    Fail,
    /// Panic inside `import_report`.
    Panic,
    /// Sleep, then produce a report.
    Block(Duration),
}

/// Counters shared by every converter a stub factory creates.
#[derive(Debug, Default)]
pub struct StubCounters {
    imports: AtomicUsize,
    cleanups: AtomicUsize,
}

impl StubCounters {
    /// `import_report` calls so far.
    #[must_use]
    pub fn imports(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }

    /// `clean_up` calls so far.
    #[must_use]
    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

/// Converter factory with scripted behaviour.
#[derive(Debug, Clone)]
pub struct StubConverterFactory {
    behavior: StubBehavior,
    counters: Arc<StubCounters>,
}

impl StubConverterFactory {
    /// Factory whose converters all follow `behavior`.
    #[must_use]
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            counters: Arc::new(StubCounters::default()),
        }
    }

    /// Shared counters.
    #[must_use]
    pub fn counters(&self) -> Arc<StubCounters> {
        Arc::clone(&self.counters)
    }
}

impl ConverterFactory for StubConverterFactory {
    fn name(&self) -> &str {
        "stub"
    }

    fn version(&self) -> &str {
        "0.0.1-test"
    }

    fn create(&self, _destination_params: &Parameters) -> CoreResult<Box<dyn ReportConverter>> {
        Ok(Box::new(StubConverter {
            behavior: self.behavior,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct StubConverter {
    behavior: StubBehavior,
    counters: Arc<StubCounters>,
}

impl ReportConverter for StubConverter {
    fn import_report(
        &mut self,
        context: &ConversionContext,
        input: &mut dyn Read,
    ) -> CoreResult<Option<Report>> {
        self.counters.imports.fetch_add(1, Ordering::SeqCst);
        let mut bytes = Vec::new();
        input
            .read_to_end(&mut bytes)
            .map_err(|err| CoreError::conversion("stub", err))?;
        let report = || {
            Report::new(json!({ "bytes": bytes.len() }))
                .with_origin(context.source_path().display().to_string())
        };
        match self.behavior {
            StubBehavior::Report => Ok(Some(report())),
            StubBehavior::Discard => Ok(None),
            StubBehavior::Fail => Err(CoreError::conversion("stub", "scripted failure")),
            StubBehavior::Panic => panic!("scripted converter panic"),
            StubBehavior::Block(pause) => {
                std::thread::sleep(pause);
                Ok(Some(report()))
            }
        }
    }

    fn clean_up(&mut self) {
        self.counters.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

/// How a [`RecordingSubmissionApi`] answers `submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitReply {
    /// `Ok(true)`.
    Accept,
    /// `Ok(false)`.
    Refuse,
    /// `Err(..)`.
    Fail,
}

/// Submission API that records every report it is handed.
#[derive(Debug)]
pub struct RecordingSubmissionApi {
    reply: SubmitReply,
    status: Mutex<ApiStatus>,
    reports: Mutex<Vec<(SubmitMethod, Report)>>,
}

impl RecordingSubmissionApi {
    /// API answering every submission with `reply`.
    #[must_use]
    pub const fn new(reply: SubmitReply) -> Self {
        Self {
            reply,
            status: Mutex::new(ApiStatus::Online),
            reports: Mutex::new(Vec::new()),
        }
    }

    /// API accepting everything.
    #[must_use]
    pub const fn accepting() -> Self {
        Self::new(SubmitReply::Accept)
    }

    /// Reports received so far.
    #[must_use]
    pub fn reports(&self) -> Vec<(SubmitMethod, Report)> {
        lock(&self.reports).clone()
    }

    /// Override the reported status.
    pub fn set_status(&self, status: ApiStatus) {
        *lock(&self.status) = status;
    }
}

#[async_trait]
impl SubmissionApi for RecordingSubmissionApi {
    async fn submit(&self, method: SubmitMethod, report: &Report) -> CoreResult<bool> {
        lock(&self.reports).push((method, report.clone()));
        match self.reply {
            SubmitReply::Accept => Ok(true),
            SubmitReply::Refuse => Ok(false),
            SubmitReply::Fail => Err(CoreError::submission("stub.submit", "scripted failure")),
        }
    }

    async fn submit_from_file(&self, method: SubmitMethod, path: &Path) -> CoreResult<bool> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| CoreError::submission("stub.submit_from_file", err))?;
        let report: Report = serde_json::from_str(&text)
            .map_err(|err| CoreError::submission("stub.submit_from_file", err))?;
        self.submit(method, &report).await
    }

    async fn ping(&self) -> bool {
        *lock(&self.status) == ApiStatus::Online
    }

    fn status(&self) -> ApiStatus {
        *lock(&self.status)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn context() -> ConversionContext {
        ConversionContext::new(PathBuf::from("/in/a.json"), Parameters::new(), Parameters::new())
    }

    #[test]
    fn stub_converters_follow_behaviour_and_count_calls() -> anyhow::Result<()> {
        let factory = StubConverterFactory::new(StubBehavior::Discard);
        let mut converter = factory.create(&Parameters::new())?;
        let mut input: &[u8] = b"abc";
        assert!(converter.import_report(&context(), &mut input)?.is_none());
        converter.clean_up();
        assert_eq!(factory.counters().imports(), 1);
        assert_eq!(factory.counters().cleanups(), 1);

        let failing = StubConverterFactory::new(StubBehavior::Fail);
        let mut converter = failing.create(&Parameters::new())?;
        let mut input: &[u8] = b"abc";
        assert!(converter.import_report(&context(), &mut input).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn recording_api_keeps_reports() -> anyhow::Result<()> {
        let api = RecordingSubmissionApi::new(SubmitReply::Refuse);
        let report = Report::new(json!({ "a": 1 }));
        assert!(!api.submit(SubmitMethod::Automatic, &report).await?);
        assert_eq!(api.reports().len(), 1);
        api.set_status(ApiStatus::Offline);
        assert!(!api.ping().await);
        Ok(())
    }
}
