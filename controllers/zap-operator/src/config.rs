//! Operator configuration loaded from environment variables.

use crate::error::ControllerError;
use crate::job_builder::{DEFAULT_REPORTER_IMAGE, DEFAULT_SCANNER_IMAGE, JobImages};
use crate::reconciler::ReconcileSettings;
use std::net::SocketAddr;
use std::time::Duration;

/// Runtime settings for the operator process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Restrict watches to one namespace (`None` watches all namespaces)
    pub watch_namespace: Option<String>,
    /// Address for `/metrics`, `/healthz` and `/readyz`
    pub http_bind_address: SocketAddr,
    /// Concurrent reconciles per controller (distinct objects only)
    pub reconcile_concurrency: u16,
    /// Delay after the last event before reconciling
    pub reconcile_debounce: Duration,
    /// Re-poll interval for in-progress scans
    pub scan_poll_interval: Duration,
    /// Short requeue after a due scheduler pass
    pub schedule_retry: Duration,
    /// Sample alerts from running scanner containers
    pub live_alerts: bool,
    /// Scanner image used when a scan does not override it
    pub scanner_image: String,
    /// Reporter side-container image
    pub reporter_image: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            http_bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            reconcile_concurrency: 3,
            reconcile_debounce: Duration::from_secs(1),
            scan_poll_interval: Duration::from_secs(10),
            schedule_retry: Duration::from_secs(5),
            live_alerts: false,
            scanner_image: DEFAULT_SCANNER_IMAGE.to_string(),
            reporter_image: DEFAULT_REPORTER_IMAGE.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let http_bind_address = match get("HTTP_BIND_ADDRESS") {
            Some(v) => v.parse().map_err(|e| {
                ControllerError::InvalidConfig(format!("HTTP_BIND_ADDRESS {v:?}: {e}"))
            })?,
            None => defaults.http_bind_address,
        };

        let reconcile_concurrency = match get("RECONCILE_CONCURRENCY") {
            Some(v) => parse_number::<u16>("RECONCILE_CONCURRENCY", &v)?,
            None => defaults.reconcile_concurrency,
        };
        if reconcile_concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            http_bind_address,
            reconcile_concurrency,
            reconcile_debounce: seconds(&get, "RECONCILE_DEBOUNCE_SECS", defaults.reconcile_debounce)?,
            scan_poll_interval: seconds(&get, "SCAN_POLL_INTERVAL_SECS", defaults.scan_poll_interval)?,
            schedule_retry: seconds(&get, "SCHEDULE_RETRY_SECS", defaults.schedule_retry)?,
            live_alerts: match get("LIVE_ALERTS") {
                Some(v) => parse_bool("LIVE_ALERTS", &v)?,
                None => defaults.live_alerts,
            },
            scanner_image: get("DEFAULT_SCANNER_IMAGE").unwrap_or(defaults.scanner_image),
            reporter_image: get("REPORTER_IMAGE").unwrap_or(defaults.reporter_image),
        })
    }

    /// Settings handed to the reconcilers
    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            scan_poll_interval: self.scan_poll_interval,
            schedule_retry: self.schedule_retry,
            live_alerts: self.live_alerts,
            images: JobImages {
                scanner: self.scanner_image.clone(),
                reporter: self.reporter_image.clone(),
            },
        }
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, ControllerError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("{key} {value:?}: {e}")))
}

fn seconds<G>(get: &G, key: &str, default: Duration) -> Result<Duration, ControllerError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => Ok(Duration::from_secs(parse_number::<u64>(key, &v)?)),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ControllerError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ControllerError::InvalidConfig(format!(
            "{key} must be a boolean, got {value:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<OperatorConfig, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        OperatorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, OperatorConfig::default());
        assert_eq!(config.scan_poll_interval, Duration::from_secs(10));
        assert_eq!(config.schedule_retry, Duration::from_secs(5));
        assert_eq!(config.scanner_image, "ghcr.io/zaproxy/zaproxy:stable");
        assert!(config.watch_namespace.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("WATCH_NAMESPACE", "security"),
            ("HTTP_BIND_ADDRESS", "127.0.0.1:9090"),
            ("RECONCILE_CONCURRENCY", "8"),
            ("SCAN_POLL_INTERVAL_SECS", "30"),
            ("LIVE_ALERTS", "true"),
            ("REPORTER_IMAGE", "busybox:1.37"),
        ])
        .unwrap();

        assert_eq!(config.watch_namespace.as_deref(), Some("security"));
        assert_eq!(config.http_bind_address.port(), 9090);
        assert_eq!(config.reconcile_concurrency, 8);
        assert_eq!(config.scan_poll_interval, Duration::from_secs(30));
        assert!(config.live_alerts);
        assert_eq!(config.reconcile_settings().images.reporter, "busybox:1.37");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            load(&[("RECONCILE_CONCURRENCY", "many")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("RECONCILE_CONCURRENCY", "0")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("LIVE_ALERTS", "sometimes")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("HTTP_BIND_ADDRESS", "localhost")]),
            Err(ControllerError::InvalidConfig(_))
        ));
    }
}
