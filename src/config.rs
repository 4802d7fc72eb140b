//! Controller configuration from environment variables
//!
//! | variable | default |
//! |---|---|
//! | `KANARI_HEALTH_PORT` | 8080 |
//! | `KANARI_WATCH_NAMESPACE` | all namespaces |
//! | `KANARI_ERROR_REQUEUE_SECS` | 10 |
//! | `KANARI_CONFLICT_REQUEUE_SECS` | 1 |
//!
//! Unparsable values fall back to the default with a warning.

use std::time::Duration;
use tracing::warn;

pub const DEFAULT_HEALTH_PORT: u16 = 8080;
pub const DEFAULT_ERROR_REQUEUE_SECS: u64 = 10;
pub const DEFAULT_CONFLICT_REQUEUE_SECS: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Port of the health and metrics server
    pub health_port: u16,

    /// Restrict the controller to one namespace; None watches all
    pub watch_namespace: Option<String>,

    /// Backoff after a failed reconcile pass
    pub error_requeue: Duration,

    /// Retry delay after an optimistic-concurrency conflict
    pub conflict_requeue: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            health_port: DEFAULT_HEALTH_PORT,
            watch_namespace: None,
            error_requeue: Duration::from_secs(DEFAULT_ERROR_REQUEUE_SECS),
            conflict_requeue: Duration::from_secs(DEFAULT_CONFLICT_REQUEUE_SECS),
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let watch_namespace = lookup("KANARI_WATCH_NAMESPACE")
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty());

        Self {
            health_port: parse_or("KANARI_HEALTH_PORT", &lookup, DEFAULT_HEALTH_PORT),
            watch_namespace,
            error_requeue: Duration::from_secs(parse_or(
                "KANARI_ERROR_REQUEUE_SECS",
                &lookup,
                DEFAULT_ERROR_REQUEUE_SECS,
            )),
            conflict_requeue: Duration::from_secs(parse_or(
                "KANARI_CONFLICT_REQUEUE_SECS",
                &lookup,
                DEFAULT_CONFLICT_REQUEUE_SECS,
            )),
        }
    }
}

fn parse_or<T: std::str::FromStr + Copy + std::fmt::Display>(
    key: &str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = key, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(ControllerConfig::from_lookup(lookup(&[])), ControllerConfig::default());
    }

    #[test]
    fn test_values_from_env() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("KANARI_HEALTH_PORT", "9090"),
            ("KANARI_WATCH_NAMESPACE", "agents"),
            ("KANARI_ERROR_REQUEUE_SECS", "30"),
            ("KANARI_CONFLICT_REQUEUE_SECS", "2"),
        ]));

        assert_eq!(config.health_port, 9090);
        assert_eq!(config.watch_namespace.as_deref(), Some("agents"));
        assert_eq!(config.error_requeue, Duration::from_secs(30));
        assert_eq!(config.conflict_requeue, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("KANARI_HEALTH_PORT", "not-a-port"),
            ("KANARI_WATCH_NAMESPACE", "  "),
        ]));

        assert_eq!(config.health_port, DEFAULT_HEALTH_PORT);
        assert!(config.watch_namespace.is_none());
    }
}
