//! Generic JSON webhook transport.

use super::{NotificationError, Notifier, ScanNotification, post_json};

/// Posts the [`ScanNotification`] itself as JSON
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    endpoint: String,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(endpoint: String, http: reqwest::Client) -> Self {
        Self { endpoint, http }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &ScanNotification) -> Result<(), NotificationError> {
        post_json(&self.http, &self.endpoint, notification).await
    }
}
