//! Exec-read strategy: read the report file from running scanner containers.

use super::{AlertAccumulator, AlertError, ParsedAlerts, ZapReport, pods_for_job};
use crate::job_builder::{REPORT_PATH, SCANNER_CONTAINER};
use cluster_client::{ClusterClient, PodExec, read_remote_file};
use tracing::debug;

fn is_running(pod: &k8s_openapi::api::core::v1::Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
}

/// Collect alerts from the live report of every running pod of `job_name`.
///
/// No running pods yields an empty result. A failed read or undecodable
/// report is an error.
pub async fn collect_from_exec(
    cluster: &dyn ClusterClient,
    exec: &dyn PodExec,
    namespace: &str,
    job_name: &str,
) -> Result<ParsedAlerts, AlertError> {
    let pods = pods_for_job(cluster, namespace, job_name).await?;
    let mut acc = AlertAccumulator::default();

    for pod in pods.iter().filter(|p| is_running(p)) {
        let Some(pod_name) = pod.metadata.name.as_deref() else {
            continue;
        };
        let pod_namespace = pod.metadata.namespace.as_deref().unwrap_or(namespace);
        let bytes = read_remote_file(exec, pod_namespace, pod_name, SCANNER_CONTAINER, REPORT_PATH).await?;
        let report: ZapReport = serde_json::from_slice(&bytes).map_err(|source| AlertError::Decode {
            pod: format!("{pod_namespace}/{pod_name}"),
            source,
        })?;
        debug!("Read live report from {}/{}", pod_namespace, pod_name);
        acc.add_report(&report);
    }

    Ok(acc.finish())
}
