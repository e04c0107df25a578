//! Prometheus metrics for scan outcomes.
//!
//! The process-wide instance is created once by [`install`] during controller
//! setup. Tests build their own [`Metrics`] so registries never collide.

use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{Arc, OnceLock};

static METRICS: OnceLock<Arc<Metrics>> = OnceLock::new();

/// Register the operator metrics exactly once and return the shared instance.
pub fn install() -> Result<Arc<Metrics>, prometheus::Error> {
    if let Some(metrics) = METRICS.get() {
        return Ok(Arc::clone(metrics));
    }
    let metrics = Arc::new(Metrics::new()?);
    Ok(Arc::clone(METRICS.get_or_init(|| metrics)))
}

/// Scan outcome metrics and the registry that exports them
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    alerts_found: IntCounterVec,
    scan_runs: IntCounterVec,
    scan_duration: HistogramVec,
    scans_in_progress: IntGaugeVec,
    last_scan_timestamp: GaugeVec,
    last_scan_duration: GaugeVec,
}

impl Metrics {
    /// Create the metric families in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let alerts_found = IntCounterVec::new(
            Opts::new(
                "zap_operator_alerts_found_total",
                "Total number of ZAP alerts found by zap-full-scan jobs.",
            ),
            &["scan_target", "scan_namespace", "risk", "plugin_id"],
        )?;
        registry.register(Box::new(alerts_found.clone()))?;

        let scan_runs = IntCounterVec::new(
            Opts::new("zap_operator_scan_runs_total", "Total number of ZAP scan runs completed."),
            &["scan_target", "scan_namespace", "status"],
        )?;
        registry.register(Box::new(scan_runs.clone()))?;

        let scan_duration = HistogramVec::new(
            HistogramOpts::new("zap_operator_scan_duration_seconds", "Duration of ZAP scans in seconds.")
                .buckets(vec![60.0, 120.0, 300.0, 600.0, 900.0, 1200.0, 1800.0, 3600.0, 7200.0]),
            &["scan_target", "scan_namespace"],
        )?;
        registry.register(Box::new(scan_duration.clone()))?;

        let scans_in_progress = IntGaugeVec::new(
            Opts::new("zap_operator_scans_in_progress", "Number of ZAP scans currently in progress."),
            &["scan_namespace"],
        )?;
        registry.register(Box::new(scans_in_progress.clone()))?;

        let last_scan_timestamp = GaugeVec::new(
            Opts::new(
                "zap_operator_last_scan_timestamp_seconds",
                "Unix timestamp of the last completed scan.",
            ),
            &["scan_target", "scan_namespace", "status"],
        )?;
        registry.register(Box::new(last_scan_timestamp.clone()))?;

        let last_scan_duration = GaugeVec::new(
            Opts::new(
                "zap_operator_last_scan_duration_seconds",
                "Duration of the last completed scan in seconds.",
            ),
            &["scan_target", "scan_namespace"],
        )?;
        registry.register(Box::new(last_scan_duration.clone()))?;

        Ok(Self {
            registry,
            alerts_found,
            scan_runs,
            scan_duration,
            scans_in_progress,
            last_scan_timestamp,
            last_scan_duration,
        })
    }

    /// Add `count` alerts for one finding; non-positive counts are ignored.
    pub fn inc_alert(&self, namespace: &str, target: &str, risk: &str, plugin_id: &str, count: i64) {
        if let Ok(count) = u64::try_from(count)
            && count > 0
        {
            self.alerts_found
                .with_label_values(&[target, namespace, risk, plugin_id])
                .inc_by(count);
        }
    }

    pub fn inc_scan_run(&self, namespace: &str, target: &str, status: &str) {
        self.scan_runs.with_label_values(&[target, namespace, status]).inc();
    }

    /// Record a finished scan's duration; only positive durations are observed.
    pub fn observe_scan_duration(&self, namespace: &str, target: &str, seconds: f64) {
        if seconds > 0.0 {
            self.scan_duration.with_label_values(&[target, namespace]).observe(seconds);
            self.last_scan_duration.with_label_values(&[target, namespace]).set(seconds);
        }
    }

    pub fn inc_scans_in_progress(&self, namespace: &str) {
        self.scans_in_progress.with_label_values(&[namespace]).inc();
    }

    pub fn dec_scans_in_progress(&self, namespace: &str) {
        self.scans_in_progress.with_label_values(&[namespace]).dec();
    }

    pub fn set_last_scan_timestamp(&self, namespace: &str, target: &str, status: &str, timestamp: f64) {
        self.last_scan_timestamp
            .with_label_values(&[target, namespace, status])
            .set(timestamp);
    }

    /// Current value of the in-progress gauge for a namespace
    #[cfg(test)]
    pub fn scans_in_progress(&self, namespace: &str) -> i64 {
        self.scans_in_progress.with_label_values(&[namespace]).get()
    }

    /// Completed runs recorded for a target and status
    #[cfg(test)]
    pub fn scan_runs(&self, namespace: &str, target: &str, status: &str) -> u64 {
        self.scan_runs.with_label_values(&[target, namespace, status]).get()
    }

    /// Alerts recorded for one finding
    #[cfg(test)]
    pub fn alerts_found(&self, namespace: &str, target: &str, risk: &str, plugin_id: &str) -> u64 {
        self.alerts_found
            .with_label_values(&[target, namespace, risk, plugin_id])
            .get()
    }

    /// Encode every registered family in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
