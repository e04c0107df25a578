//! Production implementation over `kube::Api`

use crate::cluster_trait::{ClusterClient, ExecOutput, PodExec, PodLogs};
use crate::error::ClusterError;
use crds::{ZapScan, ZapScheduledScan};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{AttachParams, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use futures::io::AsyncReadExt as _;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Talks to the API server through a shared `kube::Client`.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from the in-cluster or kubeconfig environment.
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    /// The underlying client, for wiring `kube_runtime` controllers.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Merge patch body that carries the read resourceVersion as a precondition.
fn status_patch(resource_version: Option<&String>, status: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "resourceVersion": resource_version },
        "status": status,
    })
}

fn object_name<K: kube::Resource>(obj: &K) -> Result<&str, ClusterError> {
    obj.meta()
        .name
        .as_deref()
        .ok_or_else(|| ClusterError::InvalidObject("object has no name".to_string()))
}

fn object_namespace<K: kube::Resource>(obj: &K) -> Result<&str, ClusterError> {
    obj.meta()
        .namespace
        .as_deref()
        .ok_or_else(|| ClusterError::InvalidObject("object has no namespace".to_string()))
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_scan(&self, namespace: &str, name: &str) -> Result<ZapScan, ClusterError> {
        Ok(self.api::<ZapScan>(namespace).get(name).await?)
    }

    async fn list_scans(&self, namespace: &str) -> Result<Vec<ZapScan>, ClusterError> {
        let list = self.api::<ZapScan>(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn create_scan(&self, namespace: &str, scan: &ZapScan) -> Result<ZapScan, ClusterError> {
        Ok(self
            .api::<ZapScan>(namespace)
            .create(&PostParams::default(), scan)
            .await?)
    }

    async fn delete_scan(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.api::<ZapScan>(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn patch_scan_status(&self, scan: &ZapScan) -> Result<ZapScan, ClusterError> {
        let name = object_name(scan)?;
        let namespace = object_namespace(scan)?;
        let status = scan.status.clone().unwrap_or_default();
        let body = status_patch(scan.metadata.resource_version.as_ref(), status.merge_patch());
        debug!("Patching ZapScan status {}/{}", namespace, name);
        Ok(self
            .api::<ZapScan>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&body))
            .await?)
    }

    async fn get_scheduled_scan(&self, namespace: &str, name: &str) -> Result<ZapScheduledScan, ClusterError> {
        Ok(self.api::<ZapScheduledScan>(namespace).get(name).await?)
    }

    async fn patch_scheduled_scan_status(&self, scheduled: &ZapScheduledScan) -> Result<ZapScheduledScan, ClusterError> {
        let name = object_name(scheduled)?;
        let namespace = object_namespace(scheduled)?;
        let status = scheduled.status.clone().unwrap_or_default();
        let body = status_patch(scheduled.metadata.resource_version.as_ref(), status.merge_patch());
        debug!("Patching ZapScheduledScan status {}/{}", namespace, name);
        Ok(self
            .api::<ZapScheduledScan>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&body))
            .await?)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClusterError> {
        Ok(self.api::<Job>(namespace).get(name).await?)
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, ClusterError> {
        Ok(self.api::<Job>(namespace).create(&PostParams::default(), job).await?)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.api::<Job>(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClusterError> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.api::<Pod>(namespace).list(&params).await?.items)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError> {
        Ok(self.api::<Secret>(namespace).get(name).await?)
    }
}

#[async_trait::async_trait]
impl PodLogs for KubeClusterClient {
    async fn fetch_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<Vec<u8>, ClusterError> {
        let params = LogParams {
            container: Some(container.to_string()),
            ..LogParams::default()
        };
        // Raw bytes: `Api::logs` rejects output that is not valid UTF-8.
        let mut stream = Box::pin(self.api::<Pod>(namespace).log_stream(pod, &params).await?);
        let mut buf = Vec::new();
        stream
            .read_to_end(&mut buf)
            .await
            .map_err(|e| ClusterError::Api(format!("reading logs of {namespace}/{pod}/{container}: {e}")))?;
        Ok(buf)
    }
}

#[async_trait::async_trait]
impl PodExec for KubeClusterClient {
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput, ClusterError> {
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);
        let mut process = self
            .api::<Pod>(namespace)
            .exec(pod, command.to_vec(), &params)
            .await?;

        let stdout = process.stdout();
        let stderr = process.stderr();
        let status = process.take_status();

        let read_stdout = async move {
            let mut buf = Vec::new();
            if let Some(mut reader) = stdout {
                reader.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };
        let read_stderr = async move {
            let mut buf = Vec::new();
            if let Some(mut reader) = stderr {
                reader.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };
        let (stdout, stderr) = tokio::join!(read_stdout, read_stderr);
        let stdout = stdout.map_err(|e| ClusterError::Exec {
            message: format!("reading stdout: {e}"),
            stderr: String::new(),
        })?;
        let stderr = stderr.unwrap_or_default();

        let status = match status {
            Some(fut) => fut.await,
            None => None,
        };
        process.join().await.map_err(|e| ClusterError::Exec {
            message: e.to_string(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })?;

        if let Some(status) = status
            && status.status.as_deref() == Some("Failure")
        {
            return Err(ClusterError::Exec {
                message: status
                    .message
                    .unwrap_or_else(|| "command exited non-zero".to_string()),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }

        Ok(ExecOutput { stdout, stderr })
    }
}
