//! ZapScheduledScan CRD
//!
//! Periodically materializes ZapScan objects from a template on a cron schedule.

use crate::zap_scan::ZapScanSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label placed on every ZapScan created from a schedule, valued with the schedule's name.
pub const SCHEDULED_SCAN_LABEL: &str = "spaceship.com/zapscheduledscan";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "spaceship.com",
    version = "v1alpha1",
    kind = "ZapScheduledScan",
    shortname = "zapsched",
    namespaced,
    status = "ZapScheduledScanStatus",
    printcolumn = r#"{"name":"Schedule", "type":"string", "jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"Suspend", "type":"boolean", "jsonPath":".spec.suspend"}"#,
    printcolumn = r#"{"name":"Last Schedule", "type":"date", "jsonPath":".status.lastScheduleTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ZapScheduledScanSpec {
    /// Cron expression in standard 5-field format (min hour dom mon dow)
    pub schedule: String,

    /// ZapScan spec used for every scan created by this schedule
    pub template: ZapScanSpec,

    /// Stop creating new scans
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend: Option<bool>,

    /// What to do when a previous scan is still active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_policy: Option<ConcurrencyPolicy>,
}

impl ZapScheduledScanSpec {
    pub fn is_suspended(&self) -> bool {
        self.suspend.unwrap_or(false)
    }

    pub fn effective_concurrency_policy(&self) -> ConcurrencyPolicy {
        self.concurrency_policy.unwrap_or_default()
    }
}

/// Concurrency policy for scheduled scans
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ConcurrencyPolicy {
    /// Create new scans regardless of active ones
    #[default]
    Allow,

    /// Skip the run while any scan is still active
    Forbid,

    /// Delete active scans and create a new one
    Replace,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZapScheduledScanStatus {
    /// Last time the schedule fired (a scan was created or skipped by policy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_schedule_time: Option<chrono::DateTime<chrono::Utc>>,

    /// Names of scans observed active at the last scheduling decision
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active: Vec<String>,
}

impl ZapScheduledScanStatus {
    /// JSON merge patch body for the status subresource.
    pub fn merge_patch(&self) -> serde_json::Value {
        serde_json::json!({
            "lastScheduleTime": self.last_schedule_time,
            "active": self.active,
        })
    }
}
