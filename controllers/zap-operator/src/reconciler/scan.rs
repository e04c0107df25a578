//! ZapScan reconciler
//!
//! Phases move `"" -> Running -> Succeeded | Failed`; terminal phases are
//! never left again. Each pass takes one of these actions:
//!
//! 1. Job missing: create it and mark the scan Running
//! 2. Job running: keep the scan Running and poll again
//! 3. Job finished: collect alerts, persist the terminal status, then emit
//!    metrics, send the notification and clean up the Job
//!
//! Metrics are emitted only after the terminal status has been persisted. A
//! retry after a failed write therefore never counts the same run twice: the
//! next pass sees the terminal phase and stops.

use super::{ReconcileAction, Reconciler, scan_job_name};
use crate::alerts::{self, AlertError, ParsedAlerts};
use crate::completion::{JobOutcome, job_failed_reason, job_finished_at, job_outcome};
use crate::error::ControllerError;
use crate::job_builder::{ScanJobTarget, build_scan_job};
use crate::notification::{AlertSummary, ScanNotification};
use chrono::Utc;
use cluster_client::ClusterError;
use cluster_client::time::to_utc;
use crds::{ScanPhase, ZapScan, ZapScanStatus};
use k8s_openapi::api::batch::v1::Job;
use kube::{Resource, ResourceExt};
use std::time::Duration;
use tracing::{debug, info, warn};

impl Reconciler {
    /// Reconcile the ZapScan `namespace/name`.
    pub async fn reconcile_scan(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileAction, ControllerError> {
        let scan = match self.cluster.get_scan(namespace, name).await {
            Ok(scan) => scan,
            Err(e) if e.is_not_found() => {
                debug!("ZapScan {}/{} no longer exists", namespace, name);
                return Ok(ReconcileAction::AwaitChange);
            }
            Err(e) => return Err(e.into()),
        };

        let status = scan.status.clone().unwrap_or_default();
        if status.phase.is_terminal() {
            debug!(
                "ZapScan {}/{} already {}, nothing to do",
                namespace,
                name,
                status.phase.as_str()
            );
            return Ok(ReconcileAction::AwaitChange);
        }

        let job_name = match status.job_name.as_deref().filter(|n| !n.is_empty()) {
            Some(recorded) => recorded.to_string(),
            None => {
                let created = scan
                    .metadata
                    .creation_timestamp
                    .as_ref()
                    .and_then(to_utc)
                    .ok_or_else(|| ControllerError::MissingField {
                        object: format!("ZapScan {namespace}/{name}"),
                        field: "metadata.creationTimestamp",
                    })?;
                scan_job_name(name, created)
            }
        };
        let job_namespace = scan.spec.job_namespace_or(namespace).to_string();

        match self.cluster.get_job(&job_namespace, &job_name).await {
            Ok(job) => match job_outcome(&job) {
                Some(outcome) => {
                    self.finish_scan(scan, status, &job, &job_namespace, &job_name, outcome)
                        .await
                }
                None => self.poll_scan(scan, status, &job_namespace, &job_name).await,
            },
            Err(e) if e.is_not_found() => {
                if status.finished_at.is_some() {
                    // The Job was collected after a previous completion.
                    debug!(
                        "ZapScan {}/{} finished earlier and its Job {}/{} is gone",
                        namespace, name, job_namespace, job_name
                    );
                    return Ok(ReconcileAction::AwaitChange);
                }
                self.start_scan(scan, status, &job_namespace, &job_name).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create the scan Job and record the scan as Running.
    async fn start_scan(
        &self,
        scan: ZapScan,
        mut status: ZapScanStatus,
        job_namespace: &str,
        job_name: &str,
    ) -> Result<ReconcileAction, ControllerError> {
        let name = scan.name_any();
        let namespace = scan.namespace().unwrap_or_default();

        let mut job = build_scan_job(
            ScanJobTarget {
                job_name,
                job_namespace,
                scan_name: &name,
                scan_namespace: &namespace,
            },
            &scan.spec,
            &self.settings.images,
        );
        // Owner references cannot cross namespaces; labels link the Job otherwise.
        if job_namespace == namespace {
            job.metadata.owner_references = scan.controller_owner_ref(&()).map(|owner| vec![owner]);
        }

        match self.cluster.create_job(job_namespace, &job).await {
            Ok(_) => info!("Created scan Job {}/{} for ZapScan {}/{}", job_namespace, job_name, namespace, name),
            Err(e) if e.is_already_exists() => info!(
                "Scan Job {}/{} already exists, recording ZapScan {}/{} as Running",
                job_namespace, job_name, namespace, name
            ),
            Err(e) => return Err(e.into()),
        }

        status.phase = ScanPhase::Running;
        status.job_name = Some(job_name.to_string());
        status.started_at = Some(Utc::now());
        status.finished_at = None;
        status.last_error.clear();
        self.persist_scan_status(scan, status).await?;

        self.metrics.inc_scans_in_progress(&namespace);
        Ok(ReconcileAction::Requeue(self.settings.scan_poll_interval))
    }

    /// Keep an in-progress scan Running, optionally sampling live alerts.
    async fn poll_scan(
        &self,
        scan: ZapScan,
        status: ZapScanStatus,
        job_namespace: &str,
        job_name: &str,
    ) -> Result<ReconcileAction, ControllerError> {
        let mut next = status.clone();
        next.phase = ScanPhase::Running;
        next.job_name.get_or_insert_with(|| job_name.to_string());

        if self.settings.live_alerts {
            match alerts::collect_from_exec(self.cluster.as_ref(), self.exec.as_ref(), job_namespace, job_name)
                .await
            {
                Ok(live) if live.total > 0 => next.alerts_found = live.total,
                Ok(_) => {}
                Err(AlertError::Cluster(ClusterError::FileNotFound(path))) => {
                    debug!("Live report {} not written yet", path);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if next != status {
            let name = scan.name_any();
            let namespace = scan.namespace().unwrap_or_default();
            self.persist_scan_status(scan, next).await?;
            info!("ZapScan {}/{} is Running (Job {}/{})", namespace, name, job_namespace, job_name);
        }

        Ok(ReconcileAction::Requeue(self.settings.scan_poll_interval))
    }

    /// Record the terminal outcome of a finished Job.
    async fn finish_scan(
        &self,
        scan: ZapScan,
        status: ZapScanStatus,
        job: &Job,
        job_namespace: &str,
        job_name: &str,
        outcome: JobOutcome,
    ) -> Result<ReconcileAction, ControllerError> {
        let name = scan.name_any();
        let namespace = scan.namespace().unwrap_or_default();
        let mut next = status;
        next.job_name.get_or_insert_with(|| job_name.to_string());

        if let Some(finished_at) = job_finished_at(job) {
            next.finished_at = Some(finished_at);
        }

        let alerts = match alerts::collect_from_logs(
            self.cluster.as_ref(),
            self.logs.as_ref(),
            job_namespace,
            job_name,
        )
        .await
        {
            Ok(alerts) => {
                next.alerts_found = alerts.total;
                Some(alerts)
            }
            Err(e) => {
                warn!("Failed to collect alerts for ZapScan {}/{}: {}", namespace, name, e);
                next.last_error = e.to_string();
                None
            }
        };

        let duration = match (next.started_at, next.finished_at) {
            (Some(started), Some(finished)) => (finished - started).to_std().ok(),
            _ => None,
        };

        match outcome {
            JobOutcome::Succeeded => {
                next.phase = ScanPhase::Succeeded;
                next.last_error.clear();
            }
            JobOutcome::Failed => {
                next.phase = ScanPhase::Failed;
                if next.last_error.is_empty() {
                    next.last_error = job_failed_reason(job);
                }
            }
        }

        let scan = self.persist_scan_status(scan, next).await?;
        info!(
            "ZapScan {}/{} {} with {} alerts (Job {}/{})",
            namespace,
            name,
            outcome.metric_status(),
            scan.status.as_ref().map_or(0, |s| s.alerts_found),
            job_namespace,
            job_name
        );

        self.emit_scan_metrics(&scan, &namespace, outcome, alerts.as_ref(), duration);
        self.send_notification(&scan, &namespace, alerts.as_ref(), duration).await;
        self.cleanup_job(&scan, job_namespace, job_name).await;

        Ok(ReconcileAction::AwaitChange)
    }

    async fn persist_scan_status(
        &self,
        mut scan: ZapScan,
        status: ZapScanStatus,
    ) -> Result<ZapScan, ControllerError> {
        scan.status = Some(status);
        Ok(self.cluster.patch_scan_status(&scan).await?)
    }

    #[allow(clippy::cast_precision_loss, reason = "unix seconds fit an f64 mantissa")]
    fn emit_scan_metrics(
        &self,
        scan: &ZapScan,
        namespace: &str,
        outcome: JobOutcome,
        alerts: Option<&ParsedAlerts>,
        duration: Option<Duration>,
    ) {
        let target = scan.spec.target.as_str();
        let status = outcome.metric_status();

        if let Some(alerts) = alerts {
            for finding in &alerts.by_finding {
                self.metrics
                    .inc_alert(namespace, target, &finding.risk, &finding.plugin_id, finding.count);
            }
        }
        self.metrics.inc_scan_run(namespace, target, status);
        self.metrics
            .observe_scan_duration(namespace, target, duration.map_or(0.0, |d| d.as_secs_f64()));
        self.metrics
            .set_last_scan_timestamp(namespace, target, status, Utc::now().timestamp() as f64);
        self.metrics.dec_scans_in_progress(namespace);
    }

    async fn send_notification(
        &self,
        scan: &ZapScan,
        namespace: &str,
        alerts: Option<&ParsedAlerts>,
        duration: Option<Duration>,
    ) {
        let Some(spec) = scan.spec.notification.as_ref().filter(|n| n.enabled) else {
            return;
        };
        let status = scan.status.clone().unwrap_or_default();

        let notification = ScanNotification {
            scan_name: scan.name_any(),
            namespace: namespace.to_string(),
            target: scan.spec.target.clone(),
            phase: status.phase.as_str().to_string(),
            duration: duration.unwrap_or_default(),
            total_alerts: status.alerts_found,
            alerts: alerts
                .map(|a| {
                    a.by_finding
                        .iter()
                        .map(|f| AlertSummary {
                            plugin_id: f.plugin_id.clone(),
                            risk: f.risk.clone(),
                            count: f.count,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        };

        match self.notifier.notify(namespace, spec, &notification).await {
            Ok(()) => info!("Sent notification for ZapScan {}/{}", namespace, notification.scan_name),
            Err(e) => warn!(
                "Failed to send notification for ZapScan {}/{}: {}",
                namespace, notification.scan_name, e
            ),
        }
    }

    async fn cleanup_job(&self, scan: &ZapScan, job_namespace: &str, job_name: &str) {
        if !scan.spec.cleanup_requested() {
            return;
        }
        match self.cluster.delete_job(job_namespace, job_name).await {
            Ok(()) => info!("Deleted scan Job {}/{}", job_namespace, job_name),
            Err(e) if e.is_not_found() => debug!("Scan Job {}/{} already deleted", job_namespace, job_name),
            Err(e) => warn!("Failed to delete scan Job {}/{}: {}", job_namespace, job_name, e),
        }
    }
}
