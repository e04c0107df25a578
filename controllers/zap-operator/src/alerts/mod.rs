//! Alert collection from scan pods.
//!
//! Two strategies read the ZAP JSON report of a scan Job's pods:
//!
//! - [`log_scrape`]: reads the reporter container's log after the Job has
//!   finished. Missing markers and malformed JSON are skipped per pod.
//! - [`exec_read`]: reads the report file from running scanner containers.
//!   Read and decode failures are errors.
//!
//! Both produce a [`ParsedAlerts`] aggregate keyed by `(plugin_id, risk)`.

pub mod exec_read;
pub mod log_scrape;

pub use exec_read::collect_from_exec;
pub use log_scrape::collect_from_logs;

use crate::job_builder::JOB_NAME_LABEL;
use cluster_client::{ClusterClient, ClusterError};
use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while collecting alerts
#[derive(Debug, Error)]
pub enum AlertError {
    /// Listing pods, fetching logs or exec failed
    #[error("{0}")]
    Cluster(#[from] ClusterError),

    /// Report content is not valid ZAP JSON
    #[error("decoding report from pod {pod}: {source}")]
    Decode {
        pod: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Count of alerts for one `(plugin_id, risk)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub plugin_id: String,
    pub risk: String,
    pub count: i64,
}

/// Aggregated alerts of one collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedAlerts {
    pub total: i64,
    pub by_finding: Vec<Finding>,
}

impl ParsedAlerts {
    fn from_counts(counts: BTreeMap<(String, String), i64>) -> Self {
        let by_finding: Vec<Finding> = counts
            .into_iter()
            .map(|((plugin_id, risk), count)| Finding { plugin_id, risk, count })
            .collect();
        let total = by_finding.iter().map(|f| f.count).sum();
        Self { total, by_finding }
    }
}

/// Accumulates alerts across the pods of one pass
#[derive(Debug, Default)]
pub(crate) struct AlertAccumulator {
    counts: BTreeMap<(String, String), i64>,
}

impl AlertAccumulator {
    pub(crate) fn add_report(&mut self, report: &ZapReport) {
        for site in &report.site {
            for alert in &site.alerts {
                let code = alert.risk_code.as_ref().map(RiskCode::as_code).unwrap_or_default();
                let key = (alert.plugin_id.clone(), normalize_risk(&code));
                *self.counts.entry(key).or_insert(0) += 1;
            }
        }
    }

    pub(crate) fn finish(self) -> ParsedAlerts {
        ParsedAlerts::from_counts(self.counts)
    }
}

/// The subset of the ZAP JSON report the operator reads
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ZapReport {
    #[serde(default)]
    pub site: Vec<ZapSite>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ZapSite {
    #[serde(default)]
    pub alerts: Vec<ZapAlert>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ZapAlert {
    #[serde(rename = "pluginid", default)]
    pub plugin_id: String,
    /// Missing codes count under the empty risk label
    #[serde(rename = "riskcode", default)]
    pub risk_code: Option<RiskCode>,
}

/// ZAP writes risk codes as strings; numeric codes are accepted as well.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RiskCode {
    Text(String),
    Number(i64),
}

impl RiskCode {
    fn as_code(&self) -> String {
        match self {
            RiskCode::Text(s) => s.clone(),
            RiskCode::Number(n) => n.to_string(),
        }
    }
}

/// Map ZAP risk codes 0-3 to their names. Any other code is returned as given.
pub fn normalize_risk(code: &str) -> String {
    match code.trim() {
        "0" => "informational".to_string(),
        "1" => "low".to_string(),
        "2" => "medium".to_string(),
        "3" => "high".to_string(),
        _ => code.to_string(),
    }
}

/// Pods created by the Job controller for `job_name`
pub(crate) async fn pods_for_job(
    cluster: &dyn ClusterClient,
    namespace: &str,
    job_name: &str,
) -> Result<Vec<Pod>, ClusterError> {
    cluster
        .list_pods(namespace, &format!("{JOB_NAME_LABEL}={job_name}"))
        .await
}
