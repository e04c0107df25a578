//! ZapScheduledScan reconciler
//!
//! Creates at most one ZapScan per pass when the schedule is due, even if
//! several periods elapsed since the last run. The short requeue after a due
//! pass catches up one period at a time.

use super::{ReconcileAction, Reconciler};
use crate::error::ControllerError;
use chrono::{DateTime, Utc};
use croner::Cron;
use crds::{
    ConcurrencyPolicy, SCHEDULED_SCAN_LABEL, ZapScan, ZapScheduledScan, ZapScheduledScanStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Parse a standard 5-field cron expression.
pub fn parse_schedule(expression: &str) -> Result<Cron, ControllerError> {
    Cron::new(expression.trim())
        .parse()
        .map_err(|e| ControllerError::InvalidSchedule(format!("{expression:?}: {e}")))
}

/// True when `scan` has a controller owner reference to the object with `owner_uid`.
fn is_controlled_by(scan: &ZapScan, owner_uid: &str) -> bool {
    scan.owner_references()
        .iter()
        .any(|owner| owner.controller == Some(true) && owner.uid == owner_uid)
}

impl Reconciler {
    /// Reconcile the ZapScheduledScan `namespace/name`.
    pub async fn reconcile_scheduled_scan(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileAction, ControllerError> {
        self.reconcile_scheduled_scan_at(namespace, name, Utc::now()).await
    }

    pub(crate) async fn reconcile_scheduled_scan_at(
        &self,
        namespace: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconcileAction, ControllerError> {
        let scheduled = match self.cluster.get_scheduled_scan(namespace, name).await {
            Ok(scheduled) => scheduled,
            Err(e) if e.is_not_found() => {
                debug!("ZapScheduledScan {}/{} no longer exists", namespace, name);
                return Ok(ReconcileAction::AwaitChange);
            }
            Err(e) => return Err(e.into()),
        };

        if scheduled.spec.is_suspended() {
            debug!("ZapScheduledScan {}/{} is suspended", namespace, name);
            return Ok(ReconcileAction::AwaitChange);
        }

        let schedule = parse_schedule(&scheduled.spec.schedule)?;
        let status = scheduled.status.clone().unwrap_or_default();
        let last = status.last_schedule_time.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let next = schedule
            .find_next_occurrence(&last, false)
            .map_err(|e| ControllerError::InvalidSchedule(format!("{:?}: {e}", scheduled.spec.schedule)))?;

        if next > now {
            let wait = (next - now).to_std().unwrap_or(self.settings.schedule_retry);
            debug!(
                "ZapScheduledScan {}/{} next due at {}, requeue in {:?}",
                namespace, name, next, wait
            );
            return Ok(ReconcileAction::Requeue(wait));
        }

        let owner_uid = scheduled.uid().ok_or_else(|| ControllerError::MissingField {
            object: format!("ZapScheduledScan {namespace}/{name}"),
            field: "metadata.uid",
        })?;
        let mut active: Vec<String> = self
            .cluster
            .list_scans(namespace)
            .await?
            .into_iter()
            .filter(|scan| is_controlled_by(scan, &owner_uid))
            .filter(|scan| scan.status.as_ref().map_or(true, |s| s.phase.is_active()))
            .map(|scan| scan.name_any())
            .collect();

        match scheduled.spec.effective_concurrency_policy() {
            ConcurrencyPolicy::Allow => {}
            ConcurrencyPolicy::Forbid => {
                if !active.is_empty() {
                    info!(
                        "Skipping run of ZapScheduledScan {}/{}: {} scan(s) still active",
                        namespace,
                        name,
                        active.len()
                    );
                    self.persist_schedule(scheduled, status, now, active).await?;
                    return Ok(ReconcileAction::Requeue(self.settings.schedule_retry));
                }
            }
            ConcurrencyPolicy::Replace => {
                for scan_name in active.drain(..) {
                    match self.cluster.delete_scan(namespace, &scan_name).await {
                        Ok(()) => info!(
                            "Replaced active ZapScan {}/{} of schedule {}",
                            namespace, scan_name, name
                        ),
                        Err(e) if e.is_not_found() => {
                            debug!("Active ZapScan {}/{} already deleted", namespace, scan_name);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        let child = Self::scan_from_template(&scheduled, namespace, now)?;
        let child_name = child.name_any();
        match self.cluster.create_scan(namespace, &child).await {
            Ok(_) => info!("Created ZapScan {}/{} from schedule {}", namespace, child_name, name),
            Err(e) if e.is_already_exists() => {
                info!("ZapScan {}/{} already exists", namespace, child_name);
            }
            Err(e) => return Err(e.into()),
        }
        active.push(child_name);

        self.persist_schedule(scheduled, status, now, active).await?;
        Ok(ReconcileAction::Requeue(self.settings.schedule_retry))
    }

    /// Build the child ZapScan for the run at `now`.
    fn scan_from_template(
        scheduled: &ZapScheduledScan,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<ZapScan, ControllerError> {
        let parent = scheduled.name_any();
        let owner = scheduled
            .controller_owner_ref(&())
            .ok_or_else(|| ControllerError::MissingField {
                object: format!("ZapScheduledScan {namespace}/{parent}"),
                field: "metadata.uid",
            })?;

        Ok(ZapScan {
            metadata: ObjectMeta {
                name: Some(format!("{parent}-{}", now.timestamp())),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(SCHEDULED_SCAN_LABEL.to_string(), parent)])),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            spec: scheduled.spec.template.clone(),
            status: None,
        })
    }

    /// Advance `lastScheduleTime` (never backwards) and record the active scans.
    async fn persist_schedule(
        &self,
        mut scheduled: ZapScheduledScan,
        status: ZapScheduledScanStatus,
        now: DateTime<Utc>,
        active: Vec<String>,
    ) -> Result<(), ControllerError> {
        let last_schedule_time = status.last_schedule_time.map_or(now, |last| last.max(now));
        scheduled.status = Some(ZapScheduledScanStatus {
            last_schedule_time: Some(last_schedule_time),
            active,
        });
        self.cluster.patch_scheduled_scan_status(&scheduled).await?;
        Ok(())
    }
}
