//! Cluster client errors

use thiserror::Error;

/// Errors returned by the cluster capability traits
///
/// Kubernetes API failures are classified up front so callers can branch on
/// the benign cases (not found, already exists) without inspecting status codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    /// The object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// An object with the same name already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The write was made against a stale resourceVersion
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other API or transport failure
    #[error("kubernetes API error: {0}")]
    Api(String),

    /// Remote command failed or exited non-zero
    #[error("exec failed: {message} (stderr: {stderr})")]
    Exec {
        /// Failure description
        message: String,
        /// Captured standard error of the command
        stderr: String,
    },

    /// Remote file read produced no output
    #[error("file not found or empty: {0}")]
    FileNotFound(String),

    /// Object could not be encoded or decoded
    #[error("invalid object: {0}")]
    InvalidObject(String),
}

impl ClusterError {
    /// True for [`ClusterError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    /// True for [`ClusterError::AlreadyExists`].
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        let message = err.to_string();
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound(message),
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                ClusterError::AlreadyExists(message)
            }
            kube::Error::Api(resp) if resp.code == 409 => ClusterError::Conflict(message),
            kube::Error::SerdeError(_) => ClusterError::InvalidObject(message),
            _ => ClusterError::Api(message),
        }
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        ClusterError::InvalidObject(err.to_string())
    }
}
