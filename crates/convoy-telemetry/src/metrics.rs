//! Agent metrics on a private Prometheus registry.
//!
//! # Design
//! - Collectors are private; callers use one setter or counter method per measurement.
//! - Exposes the gauges and counters the status snapshot reports.

use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{MetricStage, Result, TelemetryError};

/// Prometheus-backed metrics registry shared across the agent.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    pending_items: IntGauge,
    active_workers: IntGauge,
    queued_reports: IntGauge,
    conversions_total: IntCounterVec,
    archived_files_total: IntCounter,
    submissions_total: IntCounterVec,
    events_emitted_total: IntCounterVec,
    config_reload_failures_total: IntCounter,
}

/// Snapshot of selected gauges and counters for status reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Items tracked by the dispatcher.
    pub pending_items: i64,
    /// Workers currently running.
    pub active_workers: i64,
    /// Reports waiting in the durable queue.
    pub queued_reports: i64,
    /// Files added to archive bundles since start.
    pub archived_files_total: u64,
    /// Configuration reloads that failed since start.
    pub config_reload_failures_total: u64,
}

impl Metrics {
    /// Registry with every agent collector registered.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Metric`] naming the first collector that failed.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let pending_items = gauge("pending_items", "Source files tracked by the dispatcher")?;
        let active_workers = gauge("active_workers", "Conversion workers currently running")?;
        let queued_reports = gauge("queued_reports", "Reports waiting for delivery")?;
        let conversions_total = counter_vec(
            "conversions_total",
            "Source files converted by source and disposition",
            &["source", "disposition"],
        )?;
        let archived_files_total = counter(
            "archived_files_total",
            "Source files added to archive bundles",
        )?;
        let submissions_total = counter_vec(
            "submissions_total",
            "Report submission attempts by outcome",
            &["outcome"],
        )?;
        let events_emitted_total = counter_vec(
            "events_emitted_total",
            "Domain events emitted by type",
            &["type"],
        )?;
        let config_reload_failures_total = counter(
            "config_reload_failures_total",
            "Configuration reloads that failed",
        )?;

        register(&registry, "pending_items", &pending_items)?;
        register(&registry, "active_workers", &active_workers)?;
        register(&registry, "queued_reports", &queued_reports)?;
        register(&registry, "conversions_total", &conversions_total)?;
        register(&registry, "archived_files_total", &archived_files_total)?;
        register(&registry, "submissions_total", &submissions_total)?;
        register(&registry, "events_emitted_total", &events_emitted_total)?;
        register(
            &registry,
            "config_reload_failures_total",
            &config_reload_failures_total,
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                pending_items,
                active_workers,
                queued_reports,
                conversions_total,
                archived_files_total,
                submissions_total,
                events_emitted_total,
                config_reload_failures_total,
            }),
        })
    }

    /// Set the dispatcher pending gauge.
    pub fn set_pending_items(&self, count: usize) {
        self.inner.pending_items.set(saturating_i64(count));
    }

    /// Set the active worker gauge.
    pub fn set_active_workers(&self, count: usize) {
        self.inner.active_workers.set(saturating_i64(count));
    }

    /// Set the durable queue depth gauge.
    pub fn set_queued_reports(&self, count: usize) {
        self.inner.queued_reports.set(saturating_i64(count));
    }

    /// Count a finished conversion.
    pub fn inc_conversion(&self, source: &str, disposition: &str) {
        self.inner
            .conversions_total
            .with_label_values(&[source, disposition])
            .inc();
    }

    /// Count files committed to an archive bundle.
    pub fn add_archived_files(&self, count: usize) {
        self.inner
            .archived_files_total
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Count a submission attempt outcome.
    pub fn inc_submission(&self, outcome: &str) {
        self.inner
            .submissions_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Count one published event of `event_type`.
    pub fn inc_event(&self, event_type: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Increment the configuration reload failure counter.
    pub fn inc_config_reload_failure(&self) {
        self.inner.config_reload_failures_total.inc();
    }

    /// Prometheus text exposition of every agent collector.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Render`] or [`TelemetryError::RenderEncoding`] when encoding fails.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::Render { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::RenderEncoding { source })
    }

    /// Gauges and counters copied into the status file.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pending_items: self.inner.pending_items.get(),
            active_workers: self.inner.active_workers.get(),
            queued_reports: self.inner.queued_reports.get(),
            archived_files_total: self.inner.archived_files_total.get(),
            config_reload_failures_total: self.inner.config_reload_failures_total.get(),
        }
    }
}

fn gauge(name: &'static str, help: &str) -> Result<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::Metric {
            name,
            stage: MetricStage::Build,
            source,
        })
}

fn counter(name: &'static str, help: &str) -> Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::Metric {
            name,
            stage: MetricStage::Build,
            source,
        })
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::Metric {
            name,
            stage: MetricStage::Build,
            source,
        })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::Metric {
            name,
            stage: MetricStage::Register,
            source,
        })
}

fn saturating_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
