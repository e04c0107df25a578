//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data and setting up test scenarios.

use crate::job_builder::JOB_NAME_LABEL;
use crate::metrics::Metrics;
use crate::notification::{NotificationError, NotificationSink, ScanNotification};
use crate::reconciler::{ReconcileSettings, Reconciler};
use chrono::{DateTime, TimeZone, Utc};
use cluster_client::MockClusterClient;
use cluster_client::time::from_utc;
use crds::*;
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Fixed creation time used by test scans (unix 1700000000)
pub fn test_creation_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

/// Helper to create test ZapScan CRD
pub fn create_test_scan(name: &str, namespace: &str, target: &str) -> ZapScan {
    ZapScan {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            creation_timestamp: Some(from_utc(test_creation_time()).unwrap()),
            ..Default::default()
        },
        spec: ZapScanSpec {
            target: target.to_string(),
            ..Default::default()
        },
        status: None,
    }
}

/// Helper to create test ZapScan CRD with status
pub fn create_test_scan_with_status(
    name: &str,
    namespace: &str,
    target: &str,
    status: ZapScanStatus,
) -> ZapScan {
    let mut scan = create_test_scan(name, namespace, target);
    scan.status = Some(status);
    scan
}

/// Helper to create test ZapScheduledScan CRD
pub fn create_test_scheduled_scan(
    name: &str,
    namespace: &str,
    schedule: &str,
    policy: Option<ConcurrencyPolicy>,
) -> ZapScheduledScan {
    ZapScheduledScan {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: ZapScheduledScanSpec {
            schedule: schedule.to_string(),
            template: ZapScanSpec {
                target: "https://example.com".to_string(),
                ..Default::default()
            },
            suspend: None,
            concurrency_policy: policy,
        },
        status: None,
    }
}

/// A Job condition that is true
pub fn job_condition(kind: &str, message: Option<&str>, at: Option<DateTime<Utc>>) -> JobCondition {
    JobCondition {
        type_: kind.to_string(),
        status: "True".to_string(),
        message: message.map(str::to_string),
        last_transition_time: at.map(|t| from_utc(t).unwrap()),
        ..Default::default()
    }
}

/// Helper to create a test Job with the given conditions and completion time
pub fn create_test_job(
    name: &str,
    namespace: &str,
    conditions: Vec<JobCondition>,
    completion_time: Option<DateTime<Utc>>,
) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(JobStatus {
            conditions: Some(conditions),
            completion_time: completion_time.map(|t| from_utc(t).unwrap()),
            ..Default::default()
        }),
    }
}

/// Helper to create a pod belonging to `job_name` in the given phase
pub fn create_test_pod(name: &str, namespace: &str, job_name: &str, phase: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                JOB_NAME_LABEL.to_string(),
                job_name.to_string(),
            )])),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

/// Notification sink that records what it was asked to send
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<(String, NotificationSpec, ScanNotification)>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingSink {
    /// Notifications received so far
    pub fn sent(&self) -> Vec<(String, NotificationSpec, ScanNotification)> {
        self.sent.lock().unwrap().clone()
    }

    /// Make every subsequent notification fail
    pub fn fail(&self) {
        *self.fail.lock().unwrap() = true;
    }
}

#[async_trait::async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(
        &self,
        namespace: &str,
        spec: &NotificationSpec,
        notification: &ScanNotification,
    ) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .unwrap()
            .push((namespace.to_string(), spec.clone(), notification.clone()));
        if *self.fail.lock().unwrap() {
            return Err(NotificationError::Rejected(500));
        }
        Ok(())
    }
}

/// Helper to create a test reconciler with default settings
pub fn create_test_reconciler(mock: MockClusterClient) -> Reconciler {
    create_test_reconciler_with(mock, ReconcileSettings::default(), RecordingSink::default())
}

/// Helper to create a test reconciler with custom settings and sink
pub fn create_test_reconciler_with(
    mock: MockClusterClient,
    settings: ReconcileSettings,
    sink: RecordingSink,
) -> Reconciler {
    Reconciler::new(
        mock.clone(),
        mock.clone(),
        mock,
        Arc::new(Metrics::new().unwrap()),
        sink,
        settings,
    )
}
