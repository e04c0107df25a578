//! Reconciliation logic for ZAP scan resources.
//!
//! - `scan`: drives one Job per ZapScan from creation to a terminal phase
//! - `scheduled_scan`: materializes ZapScans from a cron schedule
//!
//! Both reconcilers are level-triggered: every pass reads the current object,
//! takes at most one action and tells the runtime when to look again.

pub mod scan;
#[cfg(test)]
mod scan_test;
pub mod scheduled_scan;

use crate::backoff::ExponentialBackoff;
use crate::job_builder::JobImages;
use crate::metrics::Metrics;
use crate::notification::NotificationSink;
use chrono::{DateTime, Utc};
use cluster_client::{ClusterClient, PodExec, PodLogs};
use kube_runtime::controller::Action;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// Timing and image settings shared by both reconcilers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Re-poll interval for in-progress scans
    pub scan_poll_interval: Duration,
    /// Short requeue after a due scheduler pass
    pub schedule_retry: Duration,
    /// Sample alerts from running scanner containers
    pub live_alerts: bool,
    pub images: JobImages,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            scan_poll_interval: Duration::from_secs(10),
            schedule_retry: Duration::from_secs(5),
            live_alerts: false,
            images: JobImages::default(),
        }
    }
}

/// What the runtime should do after a successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Look at the object again after the delay
    Requeue(Duration),
    /// Nothing to do until the object or an owned object changes
    AwaitChange,
}

impl From<ReconcileAction> for Action {
    fn from(action: ReconcileAction) -> Self {
        match action {
            ReconcileAction::Requeue(delay) => Action::requeue(delay),
            ReconcileAction::AwaitChange => Action::await_change(),
        }
    }
}

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: ExponentialBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: ExponentialBackoff::default(),
            error_count: 0,
        }
    }
}

/// Reconciles ZapScan and ZapScheduledScan resources.
pub struct Reconciler {
    pub(crate) cluster: Box<dyn ClusterClient>,
    pub(crate) logs: Box<dyn PodLogs>,
    pub(crate) exec: Box<dyn PodExec>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) notifier: Box<dyn NotificationSink>,
    pub(crate) settings: ReconcileSettings,
    /// Error count tracking per resource (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        cluster: impl ClusterClient + 'static,
        logs: impl PodLogs + 'static,
        exec: impl PodExec + 'static,
        metrics: Arc<Metrics>,
        notifier: impl NotificationSink + 'static,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            cluster: Box::new(cluster),
            logs: Box::new(logs),
            exec: Box::new(exec),
            metrics,
            notifier: Box::new(notifier),
            settings,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Next retry delay for a failing resource, and how many failures preceded it.
    pub fn next_backoff(&self, resource_key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                state.error_count += 1;
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (Duration::from_secs(60), 0)
            }
        }
    }

    /// Forget the failure history of a resource (on successful reconciliation)
    pub fn reset_backoff(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(resource_key);
        }
    }
}

/// Key under which per-object state is tracked: `kind/namespace/name`.
pub fn object_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}

/// Deterministic Job name for a scan:
/// `zap-scan-<first 8 hex chars of sha256(name)>-<unix seconds of creation>`.
pub fn scan_job_name(scan_name: &str, created: DateTime<Utc>) -> String {
    let digest = hex::encode(Sha256::digest(scan_name.as_bytes()));
    format!("zap-scan-{}-{}", &digest[..8], created.timestamp())
}
