//! Job completion detection.
//!
//! Conditions are scanned in list order and the first true `Complete` or
//! `Failed` condition decides the outcome. A Job carrying both is classified
//! by whichever appears first.

use chrono::{DateTime, Utc};
use cluster_client::time::to_utc;
use k8s_openapi::api::batch::v1::{Job, JobCondition};

/// Terminal classification of a Job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
}

impl JobOutcome {
    /// Label value used by the scan-run metrics
    pub fn metric_status(self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Failed => "failed",
        }
    }
}

fn conditions(job: &Job) -> &[JobCondition] {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default()
}

fn is_true(condition: &JobCondition, kind: &str) -> bool {
    condition.type_ == kind && condition.status == "True"
}

/// `None` while the Job is still running.
pub fn job_outcome(job: &Job) -> Option<JobOutcome> {
    conditions(job).iter().find_map(|c| {
        if is_true(c, "Complete") {
            Some(JobOutcome::Succeeded)
        } else if is_true(c, "Failed") {
            Some(JobOutcome::Failed)
        } else {
            None
        }
    })
}

/// The Job's completion time, else the transition time of the first
/// `Complete` or `Failed` condition that has one.
pub fn job_finished_at(job: &Job) -> Option<DateTime<Utc>> {
    if let Some(completed) = job
        .status
        .as_ref()
        .and_then(|s| s.completion_time.as_ref())
        .and_then(to_utc)
    {
        return Some(completed);
    }
    conditions(job)
        .iter()
        .filter(|c| c.type_ == "Complete" || c.type_ == "Failed")
        .find_map(|c| c.last_transition_time.as_ref().and_then(to_utc))
}

/// Human-readable failure reason: message, else reason, of the first true
/// `Failed` condition.
pub fn job_failed_reason(job: &Job) -> String {
    conditions(job)
        .iter()
        .filter(|c| is_true(c, "Failed"))
        .find_map(|c| {
            c.message
                .clone()
                .filter(|m| !m.is_empty())
                .or_else(|| c.reason.clone().filter(|r| !r.is_empty()))
        })
        .unwrap_or_else(|| {
            format!(
                "job {} failed",
                job.metadata.name.as_deref().unwrap_or_default()
            )
        })
}
