//! Mock cluster client for unit testing
//!
//! Stores resources in memory and implements [`ClusterClient`], [`PodLogs`]
//! and [`PodExec`] so the reconcilers can run without an API server.
//!
//! Behaviour mirrors the API server where the reconcilers depend on it:
//! - `create_*` assigns uid, creationTimestamp and resourceVersion, and
//!   rejects duplicate names with `AlreadyExists`
//! - `patch_*_status` rejects a stale resourceVersion with `Conflict`
//! - `get_*` and `delete_*` on a missing object return `NotFound`
//!
//! Any operation can be made to fail with [`MockClusterClient::fail_on`], and
//! every call is recorded for assertions.

use crate::cluster_trait::{ClusterClient, ExecOutput, PodExec, PodLogs};
use crate::error::ClusterError;
use crate::time::from_utc;
use crds::{ZapScan, ZapScheduledScan};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::Resource;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Key = (String, String);
type ContainerKey = (String, String, String);

/// Operation identifiers used for failure injection and call recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    GetScan,
    ListScans,
    CreateScan,
    DeleteScan,
    PatchScanStatus,
    GetScheduledScan,
    PatchScheduledScanStatus,
    GetJob,
    CreateJob,
    DeleteJob,
    ListPods,
    GetSecret,
    FetchLogs,
    Exec,
}

impl MockOperation {
    /// Whether the operation changes cluster state.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            MockOperation::CreateScan
                | MockOperation::DeleteScan
                | MockOperation::PatchScanStatus
                | MockOperation::PatchScheduledScanStatus
                | MockOperation::CreateJob
                | MockOperation::DeleteJob
        )
    }
}

/// In-memory cluster for tests
#[derive(Debug, Clone, Default)]
pub struct MockClusterClient {
    scans: Arc<Mutex<BTreeMap<Key, ZapScan>>>,
    scheduled_scans: Arc<Mutex<BTreeMap<Key, ZapScheduledScan>>>,
    jobs: Arc<Mutex<BTreeMap<Key, Job>>>,
    pods: Arc<Mutex<BTreeMap<Key, Pod>>>,
    secrets: Arc<Mutex<BTreeMap<Key, Secret>>>,
    logs: Arc<Mutex<HashMap<ContainerKey, Result<Vec<u8>, ClusterError>>>>,
    exec_results: Arc<Mutex<HashMap<ContainerKey, Result<ExecOutput, ClusterError>>>>,
    exec_commands: Arc<Mutex<Vec<Vec<String>>>>,
    failures: Arc<Mutex<HashMap<MockOperation, ClusterError>>>,
    calls: Arc<Mutex<Vec<MockOperation>>>,
    next_version: Arc<Mutex<u64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn meta_key<K: Resource>(obj: &K, fallback_namespace: &str) -> Key {
    let meta = obj.meta();
    key(
        meta.namespace.as_deref().unwrap_or(fallback_namespace),
        meta.name.as_deref().unwrap_or_default(),
    )
}

/// Matches equality-based selectors such as `a=b,c=d`.
fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.and_then(|l| l.get(k.trim())).map(String::as_str) == Some(v.trim()),
            None => labels.is_some_and(|l| l.contains_key(term)),
        })
}

impl MockClusterClient {
    /// Create an empty mock cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call of `operation` fail with `error`
    pub fn fail_on(&self, operation: MockOperation, error: ClusterError) {
        lock(&self.failures).insert(operation, error);
    }

    /// Remove an injected failure
    pub fn clear_failure(&self, operation: MockOperation) {
        lock(&self.failures).remove(&operation);
    }

    /// Operations invoked so far, in order
    pub fn calls(&self) -> Vec<MockOperation> {
        lock(&self.calls).clone()
    }

    /// Operations invoked so far that change cluster state
    pub fn mutating_calls(&self) -> Vec<MockOperation> {
        self.calls().into_iter().filter(|op| op.is_mutating()).collect()
    }

    /// Commands passed to `exec`, in order
    pub fn exec_commands(&self) -> Vec<Vec<String>> {
        lock(&self.exec_commands).clone()
    }

    /// Forget recorded calls
    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, operation: MockOperation) -> Result<(), ClusterError> {
        lock(&self.calls).push(operation);
        match lock(&self.failures).get(&operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn next_version(&self) -> String {
        let mut version = lock(&self.next_version);
        *version += 1;
        version.to_string()
    }

    /// Stamp server-assigned metadata on a newly stored object
    fn admit<K: Resource>(&self, obj: &mut K, namespace: &str) -> Result<(), ClusterError> {
        let version = self.next_version();
        let meta = obj.meta_mut();
        meta.namespace = Some(namespace.to_string());
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(from_utc(chrono::Utc::now())?);
        }
        meta.resource_version = Some(version);
        Ok(())
    }

    // Test setup

    /// Store a ZapScan as if it had been created, keeping preset metadata
    pub fn add_scan(&self, mut scan: ZapScan) -> ZapScan {
        let k = meta_key(&scan, "default");
        let _ = self.admit(&mut scan, &k.0);
        lock(&self.scans).insert(k, scan.clone());
        scan
    }

    pub fn add_scheduled_scan(&self, mut scheduled: ZapScheduledScan) -> ZapScheduledScan {
        let k = meta_key(&scheduled, "default");
        let _ = self.admit(&mut scheduled, &k.0);
        lock(&self.scheduled_scans).insert(k, scheduled.clone());
        scheduled
    }

    /// Store or overwrite a Job
    pub fn add_job(&self, mut job: Job) -> Job {
        let k = meta_key(&job, "default");
        let _ = self.admit(&mut job, &k.0);
        lock(&self.jobs).insert(k, job.clone());
        job
    }

    pub fn add_pod(&self, mut pod: Pod) {
        let k = meta_key(&pod, "default");
        let _ = self.admit(&mut pod, &k.0);
        lock(&self.pods).insert(k, pod);
    }

    pub fn add_secret(&self, mut secret: Secret) {
        let k = meta_key(&secret, "default");
        let _ = self.admit(&mut secret, &k.0);
        lock(&self.secrets).insert(k, secret);
    }

    /// Log text returned for one container
    pub fn set_logs(&self, namespace: &str, pod: &str, container: &str, logs: impl Into<Vec<u8>>) {
        lock(&self.logs).insert(
            (namespace.to_string(), pod.to_string(), container.to_string()),
            Ok(logs.into()),
        );
    }

    pub fn set_logs_error(&self, namespace: &str, pod: &str, container: &str, error: ClusterError) {
        lock(&self.logs).insert(
            (namespace.to_string(), pod.to_string(), container.to_string()),
            Err(error),
        );
    }

    /// Output returned by any command executed in one container
    pub fn set_exec_output(&self, namespace: &str, pod: &str, container: &str, stdout: impl Into<Vec<u8>>) {
        lock(&self.exec_results).insert(
            (namespace.to_string(), pod.to_string(), container.to_string()),
            Ok(ExecOutput {
                stdout: stdout.into(),
                stderr: Vec::new(),
            }),
        );
    }

    pub fn set_exec_error(&self, namespace: &str, pod: &str, container: &str, error: ClusterError) {
        lock(&self.exec_results).insert(
            (namespace.to_string(), pod.to_string(), container.to_string()),
            Err(error),
        );
    }

    // Inspection

    pub fn scan(&self, namespace: &str, name: &str) -> Option<ZapScan> {
        lock(&self.scans).get(&key(namespace, name)).cloned()
    }

    /// All ZapScans in a namespace, ordered by name
    pub fn scans(&self, namespace: &str) -> Vec<ZapScan> {
        lock(&self.scans)
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, scan)| scan.clone())
            .collect()
    }

    pub fn scheduled_scan(&self, namespace: &str, name: &str) -> Option<ZapScheduledScan> {
        lock(&self.scheduled_scans).get(&key(namespace, name)).cloned()
    }

    pub fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        lock(&self.jobs).get(&key(namespace, name)).cloned()
    }

    pub fn job_count(&self) -> usize {
        lock(&self.jobs).len()
    }
}

fn not_found(kind: &str, namespace: &str, name: &str) -> ClusterError {
    ClusterError::NotFound(format!("{kind} {namespace}/{name}"))
}

#[async_trait::async_trait]
impl ClusterClient for MockClusterClient {
    async fn get_scan(&self, namespace: &str, name: &str) -> Result<ZapScan, ClusterError> {
        self.record(MockOperation::GetScan)?;
        self.scan(namespace, name)
            .ok_or_else(|| not_found("ZapScan", namespace, name))
    }

    async fn list_scans(&self, namespace: &str) -> Result<Vec<ZapScan>, ClusterError> {
        self.record(MockOperation::ListScans)?;
        Ok(self.scans(namespace))
    }

    async fn create_scan(&self, namespace: &str, scan: &ZapScan) -> Result<ZapScan, ClusterError> {
        self.record(MockOperation::CreateScan)?;
        let name = scan.metadata.name.clone().unwrap_or_default();
        let mut scans = lock(&self.scans);
        let k = key(namespace, &name);
        if scans.contains_key(&k) {
            return Err(ClusterError::AlreadyExists(format!("ZapScan {namespace}/{name}")));
        }
        let mut created = scan.clone();
        created.metadata.uid = None;
        created.metadata.creation_timestamp = None;
        self.admit(&mut created, namespace)?;
        scans.insert(k, created.clone());
        Ok(created)
    }

    async fn delete_scan(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.record(MockOperation::DeleteScan)?;
        lock(&self.scans)
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found("ZapScan", namespace, name))
    }

    async fn patch_scan_status(&self, scan: &ZapScan) -> Result<ZapScan, ClusterError> {
        self.record(MockOperation::PatchScanStatus)?;
        let k = meta_key(scan, "default");
        let version = self.next_version();
        let mut scans = lock(&self.scans);
        let stored = scans
            .get_mut(&k)
            .ok_or_else(|| not_found("ZapScan", &k.0, &k.1))?;
        if scan.metadata.resource_version.is_some()
            && scan.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(ClusterError::Conflict(format!("ZapScan {}/{} has been modified", k.0, k.1)));
        }
        stored.status = scan.status.clone();
        stored.metadata.resource_version = Some(version);
        Ok(stored.clone())
    }

    async fn get_scheduled_scan(&self, namespace: &str, name: &str) -> Result<ZapScheduledScan, ClusterError> {
        self.record(MockOperation::GetScheduledScan)?;
        self.scheduled_scan(namespace, name)
            .ok_or_else(|| not_found("ZapScheduledScan", namespace, name))
    }

    async fn patch_scheduled_scan_status(&self, scheduled: &ZapScheduledScan) -> Result<ZapScheduledScan, ClusterError> {
        self.record(MockOperation::PatchScheduledScanStatus)?;
        let k = meta_key(scheduled, "default");
        let version = self.next_version();
        let mut all = lock(&self.scheduled_scans);
        let stored = all
            .get_mut(&k)
            .ok_or_else(|| not_found("ZapScheduledScan", &k.0, &k.1))?;
        if scheduled.metadata.resource_version.is_some()
            && scheduled.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(ClusterError::Conflict(format!(
                "ZapScheduledScan {}/{} has been modified",
                k.0, k.1
            )));
        }
        stored.status = scheduled.status.clone();
        stored.metadata.resource_version = Some(version);
        Ok(stored.clone())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClusterError> {
        self.record(MockOperation::GetJob)?;
        self.job(namespace, name)
            .ok_or_else(|| not_found("Job", namespace, name))
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, ClusterError> {
        self.record(MockOperation::CreateJob)?;
        let name = job.metadata.name.clone().unwrap_or_default();
        let mut jobs = lock(&self.jobs);
        let k = key(namespace, &name);
        if jobs.contains_key(&k) {
            return Err(ClusterError::AlreadyExists(format!("Job {namespace}/{name}")));
        }
        let mut created = job.clone();
        self.admit(&mut created, namespace)?;
        jobs.insert(k, created.clone());
        Ok(created)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.record(MockOperation::DeleteJob)?;
        lock(&self.jobs)
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found("Job", namespace, name))
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClusterError> {
        self.record(MockOperation::ListPods)?;
        Ok(lock(&self.pods)
            .iter()
            .filter(|((ns, _), pod)| {
                ns == namespace && selector_matches(label_selector, pod.metadata.labels.as_ref())
            })
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError> {
        self.record(MockOperation::GetSecret)?;
        lock(&self.secrets)
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("Secret", namespace, name))
    }
}

#[async_trait::async_trait]
impl PodLogs for MockClusterClient {
    async fn fetch_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<Vec<u8>, ClusterError> {
        self.record(MockOperation::FetchLogs)?;
        let k = (namespace.to_string(), pod.to_string(), container.to_string());
        lock(&self.logs)
            .get(&k)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[async_trait::async_trait]
impl PodExec for MockClusterClient {
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput, ClusterError> {
        self.record(MockOperation::Exec)?;
        lock(&self.exec_commands).push(command.to_vec());
        let k = (namespace.to_string(), pod.to_string(), container.to_string());
        lock(&self.exec_results).get(&k).cloned().unwrap_or_else(|| {
            Err(ClusterError::Exec {
                message: "command terminated with exit code 1".to_string(),
                stderr: String::new(),
            })
        })
    }
}
