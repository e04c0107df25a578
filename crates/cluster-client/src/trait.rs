//! Capability traits for mocking
//!
//! The reconcilers and the alert collector depend on these traits rather than
//! on `kube::Api`, so tests can substitute an in-memory implementation.
//! All async methods must be `Send` to work with Tokio's work-stealing runtime.

use crate::error::ClusterError;
use crds::{ZapScan, ZapScheduledScan};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, Secret};

/// Resource verbs the operator needs against the API server
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    // ZapScan
    async fn get_scan(&self, namespace: &str, name: &str) -> Result<ZapScan, ClusterError>;
    async fn list_scans(&self, namespace: &str) -> Result<Vec<ZapScan>, ClusterError>;
    async fn create_scan(&self, namespace: &str, scan: &ZapScan) -> Result<ZapScan, ClusterError>;
    async fn delete_scan(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
    /// Writes `scan.status`, failing with `Conflict` if `scan.metadata.resourceVersion` is stale.
    async fn patch_scan_status(&self, scan: &ZapScan) -> Result<ZapScan, ClusterError>;

    // ZapScheduledScan
    async fn get_scheduled_scan(&self, namespace: &str, name: &str) -> Result<ZapScheduledScan, ClusterError>;
    /// Writes `scheduled.status`, failing with `Conflict` if the resourceVersion is stale.
    async fn patch_scheduled_scan_status(&self, scheduled: &ZapScheduledScan) -> Result<ZapScheduledScan, ClusterError>;

    // Job
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClusterError>;
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, ClusterError>;
    /// Deletes with background propagation so the Job's pods are collected too.
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    // Pod / Secret
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClusterError>;
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError>;
}

/// Container log retrieval
#[async_trait::async_trait]
pub trait PodLogs: Send + Sync {
    /// Returns the complete log text of `container` in `pod`.
    async fn fetch_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<Vec<u8>, ClusterError>;
}

/// Captured output of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Remote command execution inside a container
#[async_trait::async_trait]
pub trait PodExec: Send + Sync {
    /// Runs `command` in `container`; a non-zero exit is an `Exec` error.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput, ClusterError>;
}

/// Reads a file from a running container with `test -f <path> || exit 0; cat <path>`.
///
/// A missing file exits 0 with empty output, which is reported as
/// [`ClusterError::FileNotFound`]. Any non-zero exit stays an `Exec` error.
pub async fn read_remote_file<E>(
    exec: &E,
    namespace: &str,
    pod: &str,
    container: &str,
    path: &str,
) -> Result<Vec<u8>, ClusterError>
where
    E: PodExec + ?Sized,
{
    let command = vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!("test -f {path} || exit 0; cat {path}"),
    ];
    let output = exec.exec(namespace, pod, container, &command).await?;
    if output.stdout.is_empty() {
        return Err(ClusterError::FileNotFound(format!("{namespace}/{pod}:{path}")));
    }
    Ok(output.stdout)
}
