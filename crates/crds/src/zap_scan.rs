//! ZapScan CRD
//!
//! Requests a single ZAP full scan against a target. The scan controller
//! drives one Job per ZapScan and records the outcome in status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "spaceship.com",
    version = "v1alpha1",
    kind = "ZapScan",
    shortname = "zaps",
    namespaced,
    status = "ZapScanStatus",
    printcolumn = r#"{"name":"Target", "type":"string", "jsonPath":".spec.target"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Alerts", "type":"integer", "jsonPath":".status.alertsFound"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ZapScanSpec {
    /// URL to scan (e.g. https://example.com)
    pub target: String,

    /// Optional URL or in-cluster path of an OpenAPI document to import before scanning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openapi: Option<String>,

    /// Namespace to run the scan Job in (defaults to the ZapScan's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_namespace: Option<String>,

    /// Service account used by the scan Job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Scanner image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Extra arguments appended to the zap-full-scan invocation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Delete the Job once the scan reaches a terminal phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<bool>,

    /// Where to report the scan outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationSpec>,
}

impl ZapScanSpec {
    /// Namespace the Job runs in: the override when set and non-empty, otherwise `scan_namespace`.
    pub fn job_namespace_or<'a>(&'a self, scan_namespace: &'a str) -> &'a str {
        match self.job_namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => scan_namespace,
        }
    }

    /// Whether the Job should be removed after completion.
    pub fn cleanup_requested(&self) -> bool {
        self.cleanup.unwrap_or(false)
    }
}

/// Notification settings for a finished scan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSpec {
    /// Whether notifications are sent at all
    #[serde(default)]
    pub enabled: bool,

    /// Transport: "slack" (default) or "webhook"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,

    /// Endpoint URL, used when no secretRef is given
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    /// Secret key holding the endpoint URL (takes precedence over `url`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeyRef>,
}

/// Reference to a key inside a Secret in the scan's namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Secret name
    pub name: String,

    /// Key within the Secret's data
    pub key: String,
}

/// Coarse lifecycle state of a ZapScan
///
/// The pending state serializes as the empty string, matching a freshly
/// created object whose status has never been written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ScanPhase {
    /// Not yet picked up by the controller
    #[default]
    #[serde(rename = "")]
    Pending,

    /// Job created and not yet finished
    Running,

    /// Job completed successfully
    Succeeded,

    /// Job failed
    Failed,
}

impl ScanPhase {
    /// Terminal phases never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanPhase::Succeeded | ScanPhase::Failed)
    }

    /// Pending and Running scans count as active for concurrency policies.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Wire representation of the phase.
    pub fn as_str(self) -> &'static str {
        match self {
            ScanPhase::Pending => "",
            ScanPhase::Running => "Running",
            ScanPhase::Succeeded => "Succeeded",
            ScanPhase::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZapScanStatus {
    /// High-level state indicator
    #[serde(default)]
    pub phase: ScanPhase,

    /// Name of the Job created for this scan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,

    /// When the scan Job was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,

    /// When the scan Job finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Total number of alerts parsed from the scan report
    #[serde(default)]
    pub alerts_found: i64,

    /// Human-readable error, empty when none
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_error: String,
}

impl ZapScanStatus {
    /// JSON merge patch body for the status subresource.
    ///
    /// Every field is written explicitly so that unset values clear what the
    /// server currently holds.
    pub fn merge_patch(&self) -> serde_json::Value {
        serde_json::json!({
            "phase": self.phase.as_str(),
            "jobName": self.job_name,
            "startedAt": self.started_at,
            "finishedAt": self.finished_at,
            "alertsFound": self.alerts_found,
            "lastError": if self.last_error.is_empty() { None } else { Some(&self.last_error) },
        })
    }
}
