//! ZAP Operator
//!
//! Runs OWASP ZAP security scans inside the cluster:
//! - ZapScan: one scan of one target, executed as a Kubernetes Job
//! - ZapScheduledScan: creates ZapScans on a cron schedule with a
//!   concurrency policy (Allow, Forbid, Replace)
//!
//! Findings are exported as Prometheus metrics on `/metrics` and can be sent
//! to Slack or a generic webhook when a scan finishes.

mod alerts;
mod backoff;
mod completion;
mod config;
mod controller;
mod error;
mod job_builder;
mod metrics;
mod notification;
mod reconciler;
mod server;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube and reqwest both use rustls with the ring provider.
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting ZAP operator");

    let config = OperatorConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  HTTP address: {}", config.http_bind_address);
    info!("  Scan poll interval: {:?}", config.scan_poll_interval);
    info!("  Live alerts: {}", config.live_alerts);
    info!("  Scanner image: {}", config.scanner_image);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
