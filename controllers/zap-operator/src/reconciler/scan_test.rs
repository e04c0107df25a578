//! Unit tests for the ZapScan reconciler

use super::{ReconcileAction, ReconcileSettings, scan_job_name};
use crate::alerts::AlertError;
use crate::error::ControllerError;
use crate::job_builder::{REPORT_BEGIN_MARKER, REPORT_END_MARKER, REPORTER_CONTAINER, SCANNER_CONTAINER};
use crate::test_utils::*;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use cluster_client::{ClusterError, MockClusterClient, MockOperation};
use crds::{NotificationSpec, ScanPhase, ZapScanStatus};
use std::time::Duration;

const NS: &str = "scans";
const TARGET: &str = "https://example.com";
const REPORT: &str = r#"{"site":[{"alerts":[{"pluginid":"10020","riskcode":"2"},{"pluginid":"40012","riskcode":"3"}]}]}"#;

fn job_name() -> String {
    scan_job_name("nightly", test_creation_time())
}

fn reporter_log() -> String {
    format!("waiting for report\n{REPORT_BEGIN_MARKER}\n{REPORT}\n{REPORT_END_MARKER}\n")
}

fn running_status(started_at: chrono::DateTime<Utc>) -> ZapScanStatus {
    ZapScanStatus {
        phase: ScanPhase::Running,
        job_name: Some(job_name()),
        started_at: Some(started_at),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_new_scan_creates_job_and_runs() {
    let mock = MockClusterClient::new();
    let scan = mock.add_scan(create_test_scan("nightly", NS, TARGET));
    let reconciler = create_test_reconciler(mock.clone());

    let action = reconciler.reconcile_scan(NS, "nightly").await.unwrap();
    assert_eq!(action, ReconcileAction::Requeue(Duration::from_secs(10)));

    let job = mock.job(NS, &job_name()).expect("job created");
    let owners = job.metadata.owner_references.unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "ZapScan");
    assert_eq!(Some(owners[0].uid.clone()), scan.metadata.uid);
    assert_eq!(owners[0].controller, Some(true));

    let status = mock.scan(NS, "nightly").unwrap().status.unwrap();
    assert_eq!(status.phase, ScanPhase::Running);
    assert_eq!(status.job_name, Some(job_name()));
    assert!(status.started_at.is_some());
    assert!(status.finished_at.is_none());
    assert_eq!(reconciler.metrics.scans_in_progress(NS), 1);
}

#[tokio::test]
async fn test_job_in_other_namespace_is_linked_by_labels_only() {
    let mock = MockClusterClient::new();
    let mut scan = create_test_scan("nightly", NS, TARGET);
    scan.spec.job_namespace = Some("zap-jobs".to_string());
    mock.add_scan(scan);
    let reconciler = create_test_reconciler(mock.clone());

    reconciler.reconcile_scan(NS, "nightly").await.unwrap();

    assert!(mock.job(NS, &job_name()).is_none());
    let job = mock.job("zap-jobs", &job_name()).expect("job created in override namespace");
    assert!(job.metadata.owner_references.is_none());
    let labels = job.metadata.labels.unwrap();
    assert_eq!(labels.get("spaceship.com/scan-name").map(String::as_str), Some("nightly"));
    assert_eq!(labels.get("spaceship.com/scan-ns").map(String::as_str), Some(NS));
}

#[tokio::test]
async fn test_existing_job_is_treated_as_created() {
    let mock = MockClusterClient::new();
    mock.add_scan(create_test_scan("nightly", NS, TARGET));
    mock.add_job(create_test_job(&job_name(), NS, vec![], None));
    // The cached read misses the Job a previous pass created.
    mock.fail_on(MockOperation::GetJob, ClusterError::NotFound("Job".to_string()));
    let reconciler = create_test_reconciler(mock.clone());

    let action = reconciler.reconcile_scan(NS, "nightly").await.unwrap();

    assert_eq!(action, ReconcileAction::Requeue(Duration::from_secs(10)));
    assert_eq!(mock.job_count(), 1);
    let status = mock.scan(NS, "nightly").unwrap().status.unwrap();
    assert_eq!(status.phase, ScanPhase::Running);
    assert_eq!(status.job_name, Some(job_name()));
}

#[tokio::test]
async fn test_running_job_marks_scan_running_once() {
    let mock = MockClusterClient::new();
    mock.add_scan(create_test_scan("nightly", NS, TARGET));
    mock.add_job(create_test_job(&job_name(), NS, vec![], None));
    let reconciler = create_test_reconciler(mock.clone());

    let action = reconciler.reconcile_scan(NS, "nightly").await.unwrap();
    assert_eq!(action, ReconcileAction::Requeue(Duration::from_secs(10)));
    assert_eq!(mock.scan(NS, "nightly").unwrap().status.unwrap().phase, ScanPhase::Running);
    assert_eq!(mock.mutating_calls(), vec![MockOperation::PatchScanStatus]);

    mock.reset_calls();
    let action = reconciler.reconcile_scan(NS, "nightly").await.unwrap();
    assert_eq!(action, ReconcileAction::Requeue(Duration::from_secs(10)));
    assert!(mock.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_completed_job_succeeds_scan_and_emits_metrics() {
    let mock = MockClusterClient::new();
    mock.add_scan(create_test_scan("nightly", NS, TARGET));
    let reconciler = create_test_reconciler(mock.clone());

    reconciler.reconcile_scan(NS, "nightly").await.unwrap();
    assert_eq!(reconciler.metrics.scans_in_progress(NS), 1);

    let completed = Utc.timestamp_opt(Utc::now().timestamp() + 90, 0).unwrap();
    mock.add_job(create_test_job(
        &job_name(),
        NS,
        vec![job_condition("Complete", None, Some(completed))],
        Some(completed),
    ));
    mock.add_pod(create_test_pod("nightly-pod", NS, &job_name(), "Succeeded"));
    mock.set_logs(NS, "nightly-pod", REPORTER_CONTAINER, reporter_log());

    let action = reconciler.reconcile_scan(NS, "nightly").await.unwrap();
    assert_eq!(action, ReconcileAction::AwaitChange);

    let status = mock.scan(NS, "nightly").unwrap().status.unwrap();
    assert_eq!(status.phase, ScanPhase::Succeeded);
    assert_eq!(status.finished_at, Some(completed));
    assert_eq!(status.alerts_found, 2);
    assert!(status.last_error.is_empty());

    let metrics = &reconciler.metrics;
    assert_eq!(metrics.scans_in_progress(NS), 0);
    assert_eq!(metrics.scan_runs(NS, TARGET, "succeeded"), 1);
    assert_eq!(metrics.alerts_found(NS, TARGET, "medium", "10020"), 1);
    assert_eq!(metrics.alerts_found(NS, TARGET, "high", "40012"), 1);
}

#[tokio::test]
async fn test_failed_job_records_reason() {
    let mock = MockClusterClient::new();
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    mock.add_scan(create_test_scan_with_status("nightly", NS, TARGET, running_status(started)));
    mock.add_job(create_test_job(
        &job_name(),
        NS,
        vec![job_condition("Failed", Some("BackoffLimitExceeded"), Some(started))],
        None,
    ));
    let reconciler = create_test_reconciler(mock.clone());

    let action = reconciler.reconcile_scan(NS, "nightly").await.unwrap();
    assert_eq!(action, ReconcileAction::AwaitChange);

    let status = mock.scan(NS, "nightly").unwrap().status.unwrap();
    assert_eq!(status.phase, ScanPhase::Failed);
    assert_eq!(status.last_error, "BackoffLimitExceeded");
    assert_eq!(status.finished_at, Some(started));
    assert_eq!(reconciler.metrics.scan_runs(NS, TARGET, "failed"), 1);
}

#[tokio::test]
async fn test_log_fetch_failure_is_recorded_not_fatal() {
    let mock = MockClusterClient::new();
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    mock.add_scan(create_test_scan_with_status("nightly", NS, TARGET, running_status(started)));
    mock.add_job(create_test_job(
        &job_name(),
        NS,
        vec![job_condition("Failed", Some("BackoffLimitExceeded"), None)],
        None,
    ));
    mock.add_pod(create_test_pod("nightly-pod", NS, &job_name(), "Failed"));
    mock.set_logs_error(
        NS,
        "nightly-pod",
        REPORTER_CONTAINER,
        ClusterError::Api("logs unavailable".to_string()),
    );
    let reconciler = create_test_reconciler(mock.clone());

    reconciler.reconcile_scan(NS, "nightly").await.unwrap();

    let status = mock.scan(NS, "nightly").unwrap().status.unwrap();
    assert_eq!(status.phase, ScanPhase::Failed);
    assert_eq!(status.last_error, "kubernetes API error: logs unavailable");
    assert_eq!(status.alerts_found, 0);
}

#[tokio::test]
async fn test_success_clears_collection_error() {
    let mock = MockClusterClient::new();
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    mock.add_scan(create_test_scan_with_status("nightly", NS, TARGET, running_status(started)));
    mock.add_job(create_test_job(&job_name(), NS, vec![job_condition("Complete", None, None)], None));
    mock.fail_on(MockOperation::FetchLogs, ClusterError::Api("logs unavailable".to_string()));
    mock.add_pod(create_test_pod("nightly-pod", NS, &job_name(), "Succeeded"));
    let reconciler = create_test_reconciler(mock.clone());

    reconciler.reconcile_scan(NS, "nightly").await.unwrap();

    let status = mock.scan(NS, "nightly").unwrap().status.unwrap();
    assert_eq!(status.phase, ScanPhase::Succeeded);
    assert!(status.last_error.is_empty());
}

#[tokio::test]
async fn test_terminal_scan_is_noop() {
    for phase in [ScanPhase::Succeeded, ScanPhase::Failed] {
        let mock = MockClusterClient::new();
        let status = ZapScanStatus {
            phase,
            job_name: Some(job_name()),
            ..Default::default()
        };
        mock.add_scan(create_test_scan_with_status("nightly", NS, TARGET, status));
        let reconciler = create_test_reconciler(mock.clone());

        let action = reconciler.reconcile_scan(NS, "nightly").await.unwrap();

        assert_eq!(action, ReconcileAction::AwaitChange);
        assert_eq!(mock.calls(), vec![MockOperation::GetScan]);
        assert_eq!(mock.job_count(), 0);
    }
}

#[tokio::test]
async fn test_missing_scan_is_noop() {
    let mock = MockClusterClient::new();
    let reconciler = create_test_reconciler(mock.clone());

    let action = reconciler.reconcile_scan(NS, "gone").await.unwrap();

    assert_eq!(action, ReconcileAction::AwaitChange);
    assert!(mock.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_collected_job_is_not_recreated() {
    let mock = MockClusterClient::new();
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let mut status = running_status(started);
    status.finished_at = Some(started + ChronoDuration::minutes(5));
    mock.add_scan(create_test_scan_with_status("nightly", NS, TARGET, status));
    let reconciler = create_test_reconciler(mock.clone());

    let action = reconciler.reconcile_scan(NS, "nightly").await.unwrap();

    assert_eq!(action, ReconcileAction::AwaitChange);
    assert_eq!(mock.job_count(), 0);
    assert!(mock.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_transient_error_is_propagated() {
    let mock = MockClusterClient::new();
    mock.add_scan(create_test_scan("nightly", NS, TARGET));
    mock.fail_on(MockOperation::GetJob, ClusterError::Api("connection reset".to_string()));
    let reconciler = create_test_reconciler(mock.clone());

    let result = reconciler.reconcile_scan(NS, "nightly").await;

    assert!(matches!(result, Err(ControllerError::Cluster(ClusterError::Api(_)))));
    assert!(mock.mutating_calls().is_empty());
    assert!(mock.scan(NS, "nightly").unwrap().status.is_none());
}

#[tokio::test]
async fn test_metrics_wait_for_persisted_status() {
    let mock = MockClusterClient::new();
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    mock.add_scan(create_test_scan_with_status("nightly", NS, TARGET, running_status(started)));
    mock.add_job(create_test_job(&job_name(), NS, vec![job_condition("Complete", None, None)], None));
    mock.fail_on(MockOperation::PatchScanStatus, ClusterError::Conflict("stale".to_string()));
    let reconciler = create_test_reconciler(mock.clone());

    let result = reconciler.reconcile_scan(NS, "nightly").await;
    assert!(matches!(result, Err(ControllerError::Cluster(ClusterError::Conflict(_)))));
    assert_eq!(reconciler.metrics.scan_runs(NS, TARGET, "succeeded"), 0);

    mock.clear_failure(MockOperation::PatchScanStatus);
    reconciler.reconcile_scan(NS, "nightly").await.unwrap();
    assert_eq!(reconciler.metrics.scan_runs(NS, TARGET, "succeeded"), 1);

    reconciler.reconcile_scan(NS, "nightly").await.unwrap();
    assert_eq!(reconciler.metrics.scan_runs(NS, TARGET, "succeeded"), 1);
}

#[tokio::test]
async fn test_cleanup_deletes_finished_job() {
    let mock = MockClusterClient::new();
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let mut scan = create_test_scan_with_status("nightly", NS, TARGET, running_status(started));
    scan.spec.cleanup = Some(true);
    mock.add_scan(scan);
    mock.add_job(create_test_job(&job_name(), NS, vec![job_condition("Complete", None, None)], None));
    let reconciler = create_test_reconciler(mock.clone());

    reconciler.reconcile_scan(NS, "nightly").await.unwrap();

    assert!(mock.job(NS, &job_name()).is_none());
    assert_eq!(mock.scan(NS, "nightly").unwrap().status.unwrap().phase, ScanPhase::Succeeded);

    mock.reset_calls();
    let action = reconciler.reconcile_scan(NS, "nightly").await.unwrap();
    assert_eq!(action, ReconcileAction::AwaitChange);
    assert!(mock.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_notification_sent_after_completion() {
    let mock = MockClusterClient::new();
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let finished = started + ChronoDuration::seconds(90);
    let mut scan = create_test_scan_with_status("nightly", NS, TARGET, running_status(started));
    scan.spec.notification = Some(NotificationSpec {
        enabled: true,
        protocol: "slack".to_string(),
        url: "https://hooks.example.com/zap".to_string(),
        secret_ref: None,
    });
    mock.add_scan(scan);
    mock.add_job(create_test_job(
        &job_name(),
        NS,
        vec![job_condition("Complete", None, Some(finished))],
        Some(finished),
    ));
    mock.add_pod(create_test_pod("nightly-pod", NS, &job_name(), "Succeeded"));
    mock.set_logs(NS, "nightly-pod", REPORTER_CONTAINER, reporter_log());
    let sink = RecordingSink::default();
    let reconciler = create_test_reconciler_with(mock.clone(), ReconcileSettings::default(), sink.clone());

    reconciler.reconcile_scan(NS, "nightly").await.unwrap();

    let sent = sink.sent();
    assert_eq!(sent.len(), 1);
    let (namespace, spec, notification) = &sent[0];
    assert_eq!(namespace, NS);
    assert_eq!(spec.url, "https://hooks.example.com/zap");
    assert_eq!(notification.scan_name, "nightly");
    assert_eq!(notification.phase, "Succeeded");
    assert_eq!(notification.duration, Duration::from_secs(90));
    assert_eq!(notification.total_alerts, 2);
    assert_eq!(notification.alerts.len(), 2);
}

#[tokio::test]
async fn test_notification_failure_keeps_status() {
    let mock = MockClusterClient::new();
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let mut scan = create_test_scan_with_status("nightly", NS, TARGET, running_status(started));
    scan.spec.notification = Some(NotificationSpec {
        enabled: true,
        url: "https://hooks.example.com/zap".to_string(),
        ..Default::default()
    });
    mock.add_scan(scan);
    mock.add_job(create_test_job(&job_name(), NS, vec![job_condition("Failed", None, None)], None));
    let sink = RecordingSink::default();
    sink.fail();
    let reconciler = create_test_reconciler_with(mock.clone(), ReconcileSettings::default(), sink.clone());

    let action = reconciler.reconcile_scan(NS, "nightly").await.unwrap();

    assert_eq!(action, ReconcileAction::AwaitChange);
    assert_eq!(sink.sent().len(), 1);
    assert_eq!(mock.scan(NS, "nightly").unwrap().status.unwrap().phase, ScanPhase::Failed);
}

#[tokio::test]
async fn test_disabled_notification_is_not_sent() {
    let mock = MockClusterClient::new();
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let mut scan = create_test_scan_with_status("nightly", NS, TARGET, running_status(started));
    scan.spec.notification = Some(NotificationSpec {
        enabled: false,
        url: "https://hooks.example.com/zap".to_string(),
        ..Default::default()
    });
    mock.add_scan(scan);
    mock.add_job(create_test_job(&job_name(), NS, vec![job_condition("Complete", None, None)], None));
    let sink = RecordingSink::default();
    let reconciler = create_test_reconciler_with(mock.clone(), ReconcileSettings::default(), sink.clone());

    reconciler.reconcile_scan(NS, "nightly").await.unwrap();

    assert!(sink.sent().is_empty());
}

fn live_settings() -> ReconcileSettings {
    ReconcileSettings {
        live_alerts: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_live_alerts_update_running_scan() {
    let mock = MockClusterClient::new();
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    mock.add_scan(create_test_scan_with_status("nightly", NS, TARGET, running_status(started)));
    mock.add_job(create_test_job(&job_name(), NS, vec![], None));
    mock.add_pod(create_test_pod("nightly-pod", NS, &job_name(), "Running"));
    mock.set_exec_output(NS, "nightly-pod", SCANNER_CONTAINER, REPORT);
    let reconciler = create_test_reconciler_with(mock.clone(), live_settings(), RecordingSink::default());

    let action = reconciler.reconcile_scan(NS, "nightly").await.unwrap();

    assert_eq!(action, ReconcileAction::Requeue(Duration::from_secs(10)));
    let status = mock.scan(NS, "nightly").unwrap().status.unwrap();
    assert_eq!(status.phase, ScanPhase::Running);
    assert_eq!(status.alerts_found, 2);
}

#[tokio::test]
async fn test_live_report_not_written_yet() {
    let mock = MockClusterClient::new();
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    mock.add_scan(create_test_scan_with_status("nightly", NS, TARGET, running_status(started)));
    mock.add_job(create_test_job(&job_name(), NS, vec![], None));
    mock.add_pod(create_test_pod("nightly-pod", NS, &job_name(), "Running"));
    // The read script exits 0 with no output while zap.json does not exist.
    mock.set_exec_output(NS, "nightly-pod", SCANNER_CONTAINER, "");
    let reconciler = create_test_reconciler_with(mock.clone(), live_settings(), RecordingSink::default());

    let action = reconciler.reconcile_scan(NS, "nightly").await.unwrap();

    assert_eq!(action, ReconcileAction::Requeue(Duration::from_secs(10)));
    assert!(mock.mutating_calls().is_empty());
    let script = &mock.exec_commands()[0][2];
    assert!(script.starts_with("test -f /zap/wrk/zap.json || exit 0;"));
}

#[tokio::test]
async fn test_live_report_exec_failure_is_fatal() {
    let mock = MockClusterClient::new();
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    mock.add_scan(create_test_scan_with_status("nightly", NS, TARGET, running_status(started)));
    mock.add_job(create_test_job(&job_name(), NS, vec![], None));
    mock.add_pod(create_test_pod("nightly-pod", NS, &job_name(), "Running"));
    mock.set_exec_error(
        NS,
        "nightly-pod",
        SCANNER_CONTAINER,
        ClusterError::Exec {
            message: "command terminated with non-zero exit code: exit status 1".to_string(),
            stderr: String::new(),
        },
    );
    let reconciler = create_test_reconciler_with(mock.clone(), live_settings(), RecordingSink::default());

    let result = reconciler.reconcile_scan(NS, "nightly").await;

    assert!(matches!(
        result,
        Err(ControllerError::Alerts(AlertError::Cluster(ClusterError::Exec { .. })))
    ));
    assert!(mock.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_live_report_malformed_is_fatal() {
    let mock = MockClusterClient::new();
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    mock.add_scan(create_test_scan_with_status("nightly", NS, TARGET, running_status(started)));
    mock.add_job(create_test_job(&job_name(), NS, vec![], None));
    mock.add_pod(create_test_pod("nightly-pod", NS, &job_name(), "Running"));
    mock.set_exec_output(NS, "nightly-pod", SCANNER_CONTAINER, "{\"site\": [");
    let reconciler = create_test_reconciler_with(mock.clone(), live_settings(), RecordingSink::default());

    let result = reconciler.reconcile_scan(NS, "nightly").await;

    assert!(matches!(result, Err(ControllerError::Alerts(_))));
    assert!(mock.mutating_calls().is_empty());
}
