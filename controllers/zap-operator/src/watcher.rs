//! Kubernetes resource watchers.
//!
//! Both custom resources are driven by `kube_runtime::Controller` through the
//! generic `watch_resource()` helper, which owns the reconcile loop,
//! reconnection and per-object retry backoff.
//!
//! - ZapScan also watches the Jobs it creates, so a Job finishing wakes its
//!   scan without waiting for the next poll.
//! - ZapScheduledScan also watches its child ZapScans, so a child finishing
//!   refreshes the parent's active list.

use crate::error::ControllerError;
use crate::job_builder::SCAN_JOB_SELECTOR;
use crate::reconciler::{ReconcileAction, Reconciler, object_key};
use crds::{ZapScan, ZapScheduledScan};
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::batch::v1::Job;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<ReconcileAction, ControllerError>> + Send>>;

/// Run `controller` until its watch streams end.
///
/// `reconcile_fn` receives the namespace and name of the object to reconcile.
/// Failures requeue with the reconciler's per-object exponential backoff;
/// the first success resets it.
async fn watch_resource<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
    controller_config: ControllerConfig,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, String, String) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = object_key(resource_name, &obj.namespace().unwrap_or_default(), &obj.name_any());
        let (delay, failures) = ctx.next_backoff(&key);
        error!(
            "Reconciliation error for {} (failure {}), retrying in {:?}: {}",
            key, failures, delay, error
        );
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let namespace = obj.namespace().unwrap_or_default();
            let name = obj.name_any();
            let key = object_key(resource_name, &namespace, &name);
            debug!("Reconciling {}", key);

            let action = reconcile_fn(Arc::clone(&ctx), namespace, name).await?;
            ctx.reset_backoff(&key);
            Ok::<Action, ControllerError>(action.into())
        }
    };

    controller
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", resource_name, obj.name),
                Err(e) => error!("Controller error for {}: {}", resource_name, e),
            }
        })
        .await;

    Ok(())
}

/// Watches ZapScan and ZapScheduledScan resources.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    client: Client,
    namespace: Option<String>,
    debounce: Duration,
    concurrency: u16,
}

impl Watcher {
    /// Creates a new watcher. `namespace: None` watches every namespace.
    pub fn new(
        reconciler: Arc<Reconciler>,
        client: Client,
        namespace: Option<String>,
        debounce: Duration,
        concurrency: u16,
    ) -> Self {
        Self {
            reconciler,
            client,
            namespace,
            debounce,
            concurrency,
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig::default()
            .debounce(self.debounce)
            .concurrency(self.concurrency)
    }

    /// Watches ZapScan resources and the Jobs that run them.
    pub async fn watch_scans(&self) -> Result<(), ControllerError> {
        let jobs = watcher::Config::default().labels(SCAN_JOB_SELECTOR);
        let controller = Controller::new(self.api::<ZapScan>(), watcher::Config::default())
            .owns(self.api::<Job>(), jobs);

        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, namespace, name| {
                Box::pin(async move { reconciler.reconcile_scan(&namespace, &name).await })
            },
            "ZapScan",
            self.controller_config(),
        )
        .await
    }

    /// Watches ZapScheduledScan resources and the scans they create.
    pub async fn watch_scheduled_scans(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<ZapScheduledScan>(), watcher::Config::default())
            .owns(self.api::<ZapScan>(), watcher::Config::default());

        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, namespace, name| {
                Box::pin(async move { reconciler.reconcile_scheduled_scan(&namespace, &name).await })
            },
            "ZapScheduledScan",
            self.controller_config(),
        )
        .await
    }
}
