//! Controller-specific error types.
//!
//! Errors returned from a reconcile pass are fatal to that pass and are
//! retried by the controller's error policy with per-object backoff.
//! Benign API outcomes (not found, already exists) never reach this type.

use crate::alerts::AlertError;
use cluster_client::ClusterError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the ZAP operator.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client construction or watch error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cluster API call failed
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Live alert collection failed
    #[error("Alert collection failed: {0}")]
    Alerts(#[from] AlertError),

    /// Cron expression could not be parsed
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Object is missing a field the API server always sets
    #[error("Object {object} is missing {field}")]
    MissingField {
        object: String,
        field: &'static str,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// HTTP endpoint failed to bind or serve
    #[error("HTTP server error: {0}")]
    Server(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
