//! Scan outcome notifications.
//!
//! After a scan's terminal status has been persisted, the reconciler hands a
//! [`ScanNotification`] to a [`NotificationSink`]. The production sink
//! resolves the endpoint from the scan's [`NotificationSpec`] and picks a
//! [`Notifier`] by protocol:
//!
//! - `slack` or empty: Slack Block Kit message to an incoming webhook
//! - `webhook`: the notification itself as JSON
//!
//! Failures never roll back the persisted status.

pub mod slack;
pub mod webhook;

pub use slack::SlackNotifier;
pub use webhook::WebhookNotifier;

use cluster_client::{ClusterClient, ClusterError};
use crds::NotificationSpec;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while resolving an endpoint or sending a notification
#[derive(Debug, Error)]
pub enum NotificationError {
    /// The referenced Secret could not be read
    #[error("failed to get secret {name}: {source}")]
    Secret {
        name: String,
        #[source]
        source: ClusterError,
    },

    /// The Secret exists but lacks the key
    #[error("key {key} not found in secret {name}")]
    MissingSecretKey { name: String, key: String },

    /// Neither a URL nor a Secret reference is configured
    #[error("no URL or SecretRef provided for notification")]
    NoEndpoint,

    #[error("unsupported notification protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with an error status
    #[error("notification endpoint returned status {0}")]
    Rejected(u16),
}

/// Count of alerts for one finding, as reported to humans
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSummary {
    pub plugin_id: String,
    pub risk: String,
    pub count: i64,
}

/// Outcome of one finished scan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanNotification {
    pub scan_name: String,
    pub namespace: String,
    pub target: String,
    pub phase: String,
    #[serde(rename = "durationSeconds", serialize_with = "serialize_seconds")]
    pub duration: Duration,
    pub total_alerts: i64,
    pub alerts: Vec<AlertSummary>,
}

fn serialize_seconds<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}

/// A transport that delivers notifications to one endpoint
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &ScanNotification) -> Result<(), NotificationError>;
}

/// Delivers a notification according to a scan's settings
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        namespace: &str,
        spec: &NotificationSpec,
        notification: &ScanNotification,
    ) -> Result<(), NotificationError>;
}

/// Resolve the endpoint URL: the Secret key when referenced, otherwise `url`.
pub async fn resolve_endpoint(
    cluster: &dyn ClusterClient,
    namespace: &str,
    spec: &NotificationSpec,
) -> Result<String, NotificationError> {
    if let Some(secret_ref) = &spec.secret_ref {
        let secret = cluster
            .get_secret(namespace, &secret_ref.name)
            .await
            .map_err(|source| NotificationError::Secret {
                name: secret_ref.name.clone(),
                source,
            })?;
        let value = secret
            .data
            .as_ref()
            .and_then(|data| data.get(&secret_ref.key))
            .map(|bytes| String::from_utf8_lossy(&bytes.0).trim().to_string())
            .or_else(|| {
                secret
                    .string_data
                    .as_ref()
                    .and_then(|data| data.get(&secret_ref.key))
                    .map(|s| s.trim().to_string())
            })
            .ok_or_else(|| NotificationError::MissingSecretKey {
                name: secret_ref.name.clone(),
                key: secret_ref.key.clone(),
            })?;
        return Ok(value);
    }

    if spec.url.is_empty() {
        return Err(NotificationError::NoEndpoint);
    }
    Ok(spec.url.clone())
}

/// Select a transport for `protocol`
pub fn notifier_for(
    protocol: &str,
    endpoint: String,
    http: reqwest::Client,
) -> Result<Box<dyn Notifier>, NotificationError> {
    match protocol.trim().to_ascii_lowercase().as_str() {
        "slack" | "" => Ok(Box::new(SlackNotifier::new(endpoint, http))),
        "webhook" => Ok(Box::new(WebhookNotifier::new(endpoint, http))),
        other => Err(NotificationError::UnsupportedProtocol(other.to_string())),
    }
}

/// Production sink: resolves endpoints through the cluster and posts with `reqwest`
pub struct HttpNotificationSink {
    cluster: Box<dyn ClusterClient>,
    http: reqwest::Client,
}

impl std::fmt::Debug for HttpNotificationSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpNotificationSink").finish_non_exhaustive()
    }
}

impl HttpNotificationSink {
    pub fn new(cluster: Box<dyn ClusterClient>) -> Result<Self, NotificationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { cluster, http })
    }
}

#[async_trait::async_trait]
impl NotificationSink for HttpNotificationSink {
    async fn notify(
        &self,
        namespace: &str,
        spec: &NotificationSpec,
        notification: &ScanNotification,
    ) -> Result<(), NotificationError> {
        let endpoint = resolve_endpoint(self.cluster.as_ref(), namespace, spec).await?;
        let notifier = notifier_for(&spec.protocol, endpoint, self.http.clone())?;
        notifier.send(notification).await
    }
}

/// Post `body` as JSON and map error statuses to [`NotificationError::Rejected`]
pub(crate) async fn post_json<T: Serialize + ?Sized>(
    http: &reqwest::Client,
    endpoint: &str,
    body: &T,
) -> Result<(), NotificationError> {
    let response = http.post(endpoint).json(body).send().await?;
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(NotificationError::Rejected(status.as_u16()));
    }
    Ok(())
}
