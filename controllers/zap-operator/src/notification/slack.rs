//! Slack incoming-webhook transport (Block Kit messages).

use super::{NotificationError, Notifier, ScanNotification, post_json};
use serde::Serialize;
use std::fmt::Write as _;
use std::time::Duration;

const HIGH_RISK_EMOJI: &str = ":red_circle:";
const MEDIUM_RISK_EMOJI: &str = ":large_orange_circle:";
const LOW_RISK_EMOJI: &str = ":large_yellow_circle:";
const DEFAULT_RISK_EMOJI: &str = ":white_circle:";

/// Posts scan outcomes to a Slack incoming webhook
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    webhook_url: String,
    http: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String, http: reqwest::Client) -> Self {
        Self { webhook_url, http }
    }
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, notification: &ScanNotification) -> Result<(), NotificationError> {
        post_json(&self.http, &self.webhook_url, &build_message(notification)).await
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SlackMessage {
    blocks: Vec<SlackBlock>,
}

#[derive(Debug, Serialize)]
struct SlackBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<SlackText>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<SlackText>,
}

#[derive(Debug, Serialize)]
struct SlackText {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

impl SlackBlock {
    fn text(kind: &'static str, text: SlackText) -> Self {
        Self { kind, text: Some(text), fields: Vec::new() }
    }
}

fn mrkdwn(text: String) -> SlackText {
    SlackText { kind: "mrkdwn", text }
}

fn risk_emoji(risk: &str) -> &'static str {
    match risk {
        "high" => HIGH_RISK_EMOJI,
        "medium" => MEDIUM_RISK_EMOJI,
        "low" => LOW_RISK_EMOJI,
        _ => DEFAULT_RISK_EMOJI,
    }
}

/// Render a duration the way humans read it: `1h2m3s`, `45s`, `0s`.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{hours}h");
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{minutes}m");
    }
    let _ = write!(out, "{seconds}s");
    out
}

pub(crate) fn build_message(n: &ScanNotification) -> SlackMessage {
    let status_emoji = if n.phase == "Failed" { ":x:" } else { ":white_check_mark:" };

    let mut blocks = vec![
        SlackBlock::text(
            "header",
            SlackText {
                kind: "plain_text",
                text: format!("ZAP Scan: {}", n.scan_name),
            },
        ),
        SlackBlock {
            kind: "section",
            text: None,
            fields: vec![
                mrkdwn(format!("*Status:*\n{status_emoji} {}", n.phase)),
                mrkdwn(format!("*Target:*\n{}", n.target)),
                mrkdwn(format!("*Namespace:*\n{}", n.namespace)),
                mrkdwn(format!("*Duration:*\n{}", format_duration(n.duration))),
            ],
        },
        SlackBlock { kind: "divider", text: None, fields: Vec::new() },
        SlackBlock::text("section", mrkdwn(format!("*Total Alerts:* {}", n.total_alerts))),
    ];

    if !n.alerts.is_empty() {
        let mut breakdown = String::from("*Alert Breakdown:*\n");
        for alert in &n.alerts {
            let _ = writeln!(
                breakdown,
                "{} {} ({}): {}",
                risk_emoji(&alert.risk),
                alert.risk,
                alert.plugin_id,
                alert.count
            );
        }
        blocks.push(SlackBlock::text("section", mrkdwn(breakdown)));
    }

    SlackMessage { blocks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::AlertSummary;

    fn notification(phase: &str, alerts: Vec<AlertSummary>) -> ScanNotification {
        ScanNotification {
            scan_name: "nightly".to_string(),
            namespace: "scans".to_string(),
            target: "https://example.com".to_string(),
            phase: phase.to_string(),
            duration: Duration::from_secs(3723),
            total_alerts: alerts.iter().map(|a| a.count).sum(),
            alerts,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h2m3s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h0m0s");
    }

    #[test]
    fn test_message_without_alerts() {
        let value = serde_json::to_value(build_message(&notification("Failed", vec![]))).unwrap();
        let blocks = value["blocks"].as_array().unwrap();

        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0]["type"], "header");
        assert_eq!(blocks[0]["text"]["text"], "ZAP Scan: nightly");
        assert_eq!(blocks[1]["fields"][0]["text"], "*Status:*\n:x: Failed");
        assert_eq!(blocks[1]["fields"][3]["text"], "*Duration:*\n1h2m3s");
        assert_eq!(blocks[2], serde_json::json!({ "type": "divider" }));
        assert_eq!(blocks[3]["text"]["text"], "*Total Alerts:* 0");
    }

    #[test]
    fn test_message_with_breakdown() {
        let alerts = vec![
            AlertSummary { plugin_id: "40012".to_string(), risk: "high".to_string(), count: 1 },
            AlertSummary { plugin_id: "10020".to_string(), risk: "medium".to_string(), count: 2 },
            AlertSummary { plugin_id: "10038".to_string(), risk: "informational".to_string(), count: 4 },
        ];
        let value = serde_json::to_value(build_message(&notification("Succeeded", alerts))).unwrap();
        let blocks = value["blocks"].as_array().unwrap();

        assert_eq!(blocks.len(), 5);
        assert_eq!(blocks[1]["fields"][0]["text"], "*Status:*\n:white_check_mark: Succeeded");
        assert_eq!(
            blocks[4]["text"]["text"],
            "*Alert Breakdown:*\n:red_circle: high (40012): 1\n:large_orange_circle: medium (10020): 2\n:white_circle: informational (10038): 4\n"
        );
    }
}
