//! Log-scrape strategy: read the report the reporter container printed.

use super::{AlertAccumulator, AlertError, ParsedAlerts, ZapReport, pods_for_job};
use crate::job_builder::{REPORT_BEGIN_MARKER, REPORTER_CONTAINER};
use cluster_client::{ClusterClient, PodLogs};
use tracing::{debug, warn};

/// Collect alerts from the reporter logs of every pod of `job_name`.
///
/// Pods without the begin marker, or whose JSON does not decode, contribute
/// nothing. Failing to list pods or fetch a log is an error.
pub async fn collect_from_logs(
    cluster: &dyn ClusterClient,
    logs: &dyn PodLogs,
    namespace: &str,
    job_name: &str,
) -> Result<ParsedAlerts, AlertError> {
    let pods = pods_for_job(cluster, namespace, job_name).await?;
    let mut acc = AlertAccumulator::default();

    for pod in &pods {
        let Some(pod_name) = pod.metadata.name.as_deref() else {
            continue;
        };
        let pod_namespace = pod.metadata.namespace.as_deref().unwrap_or(namespace);
        let bytes = logs.fetch_logs(pod_namespace, pod_name, REPORTER_CONTAINER).await?;
        let text = String::from_utf8_lossy(&bytes);

        match extract_report(&text) {
            Some(Ok(report)) => acc.add_report(&report),
            Some(Err(e)) => warn!(
                "Skipping malformed report in {}/{} logs: {}",
                pod_namespace, pod_name, e
            ),
            None => debug!("No report marker in {}/{} logs", pod_namespace, pod_name),
        }
    }

    Ok(acc.finish())
}

/// Decode the first JSON value after the begin marker.
///
/// Returns `None` when there is no marker or no `{` after it.
fn extract_report(text: &str) -> Option<Result<ZapReport, serde_json::Error>> {
    let after_marker = &text[text.find(REPORT_BEGIN_MARKER)?..];
    let candidate = &after_marker[after_marker.find('{')?..];
    serde_json::Deserializer::from_str(candidate)
        .into_iter::<ZapReport>()
        .next()
}
