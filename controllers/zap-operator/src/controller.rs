//! Main controller implementation.
//!
//! Wires the reconciler, both resource watchers and the metrics/health HTTP
//! server together and runs them until one of them exits.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::metrics;
use crate::notification::HttpNotificationSink;
use crate::reconciler::Reconciler;
use crate::server;
use crate::watcher::Watcher;
use cluster_client::KubeClusterClient;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for ZapScan and ZapScheduledScan resources.
pub struct Controller {
    scan_watcher: JoinHandle<Result<(), ControllerError>>,
    scheduled_scan_watcher: JoinHandle<Result<(), ControllerError>>,
    http_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing ZAP operator");

        let kube_client = Client::try_default().await?;
        let cluster = KubeClusterClient::new(kube_client.clone());

        let metrics = metrics::install()?;
        let notifier = HttpNotificationSink::new(Box::new(cluster.clone()))
            .map_err(|e| ControllerError::InvalidConfig(format!("notification HTTP client: {e}")))?;

        let reconciler = Arc::new(Reconciler::new(
            cluster.clone(),
            cluster.clone(),
            cluster,
            Arc::clone(&metrics),
            notifier,
            config.reconcile_settings(),
        ));

        let watcher_instance = Arc::new(Watcher::new(
            reconciler,
            kube_client,
            config.watch_namespace.clone(),
            config.reconcile_debounce,
            config.reconcile_concurrency,
        ));

        let scan_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_scans().await })
        };

        let scheduled_scan_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_scheduled_scans().await })
        };

        let http_server = tokio::spawn(server::serve(config.http_bind_address, metrics));

        Ok(Self {
            scan_watcher,
            scheduled_scan_watcher,
            http_server,
        })
    }

    /// Runs until a watcher or the HTTP server exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("ZAP operator running");

        tokio::select! {
            result = &mut self.scan_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ZapScan watcher panicked: {e}")))?
                    .map_err(|e| ControllerError::Watch(format!("ZapScan watcher error: {e}")))?;
            }
            result = &mut self.scheduled_scan_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ZapScheduledScan watcher panicked: {e}")))?
                    .map_err(|e| ControllerError::Watch(format!("ZapScheduledScan watcher error: {e}")))?;
            }
            result = &mut self.http_server => {
                result.map_err(|e| ControllerError::Watch(format!("HTTP server panicked: {e}")))??;
            }
        }

        info!("ZAP operator stopped");
        Ok(())
    }
}
