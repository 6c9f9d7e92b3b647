//! Kernel configuration (intervals, leases, timeouts).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tunables for the background loops and store calls.
///
/// Durations are held in milliseconds so the struct deserializes from plain
/// config files; use the `Duration` accessors in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub projection_refresh_interval_ms: u64,
    /// Cap on events folded per projection refresh (unbounded when `None`).
    pub projection_batch_limit: Option<usize>,
    pub outbox_relay_interval_ms: u64,
    pub outbox_lease_ms: u64,
    pub broker_serve_interval_ms: u64,
    pub broker_cleanup_interval_ms: u64,
    pub store_timeout_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            projection_refresh_interval_ms: 1_000,
            projection_batch_limit: None,
            outbox_relay_interval_ms: 1_000,
            outbox_lease_ms: 30_000,
            broker_serve_interval_ms: 100,
            broker_cleanup_interval_ms: 1_000,
            store_timeout_ms: 5_000,
        }
    }
}

impl KernelConfig {
    /// Defaults overridden by `KEEL_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `KEEL_*` key.
    ///
    /// Unparseable and zero values are ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let millis = |key: &str, current: &mut u64| {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse::<u64>() {
                    Ok(0) => warn!(key, "ignoring zero config value"),
                    Ok(value) => *current = value,
                    Err(err) => {
                        warn!(key, value = %raw, error = %err, "ignoring invalid config value")
                    }
                }
            }
        };

        millis(
            "KEEL_PROJECTION_REFRESH_INTERVAL_MS",
            &mut config.projection_refresh_interval_ms,
        );
        millis("KEEL_OUTBOX_RELAY_INTERVAL_MS", &mut config.outbox_relay_interval_ms);
        millis("KEEL_OUTBOX_LEASE_MS", &mut config.outbox_lease_ms);
        millis("KEEL_BROKER_SERVE_INTERVAL_MS", &mut config.broker_serve_interval_ms);
        millis(
            "KEEL_BROKER_CLEANUP_INTERVAL_MS",
            &mut config.broker_cleanup_interval_ms,
        );
        millis("KEEL_STORE_TIMEOUT_MS", &mut config.store_timeout_ms);

        if let Some(raw) = lookup("KEEL_PROJECTION_BATCH_LIMIT") {
            match raw.trim().parse::<usize>() {
                Ok(0) => config.projection_batch_limit = None,
                Ok(limit) => config.projection_batch_limit = Some(limit),
                Err(err) => warn!(
                    key = "KEEL_PROJECTION_BATCH_LIMIT",
                    value = %raw,
                    error = %err,
                    "ignoring invalid config value"
                ),
            }
        }

        config
    }

    pub fn projection_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.projection_refresh_interval_ms)
    }

    pub fn outbox_relay_interval(&self) -> Duration {
        Duration::from_millis(self.outbox_relay_interval_ms)
    }

    pub fn outbox_lease(&self) -> Duration {
        Duration::from_millis(self.outbox_lease_ms)
    }

    pub fn broker_serve_interval(&self) -> Duration {
        Duration::from_millis(self.broker_serve_interval_ms)
    }

    pub fn broker_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.broker_cleanup_interval_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn with_projection_refresh_interval(mut self, interval: Duration) -> Self {
        self.projection_refresh_interval_ms = as_millis(interval);
        self
    }

    pub fn with_projection_batch_limit(mut self, limit: Option<usize>) -> Self {
        self.projection_batch_limit = limit;
        self
    }

    pub fn with_outbox_relay_interval(mut self, interval: Duration) -> Self {
        self.outbox_relay_interval_ms = as_millis(interval);
        self
    }

    pub fn with_outbox_lease(mut self, lease: Duration) -> Self {
        self.outbox_lease_ms = as_millis(lease);
        self
    }

    pub fn with_broker_serve_interval(mut self, interval: Duration) -> Self {
        self.broker_serve_interval_ms = as_millis(interval);
        self
    }

    pub fn with_broker_cleanup_interval(mut self, interval: Duration) -> Self {
        self.broker_cleanup_interval_ms = as_millis(interval);
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout_ms = as_millis(timeout);
        self
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = KernelConfig::default();
        assert_eq!(config.projection_refresh_interval(), Duration::from_secs(1));
        assert_eq!(config.outbox_lease(), Duration::from_secs(30));
        assert_eq!(config.broker_serve_interval(), Duration::from_millis(100));
        assert_eq!(config.broker_cleanup_interval(), Duration::from_secs(1));
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
        assert_eq!(config.projection_batch_limit, None);
    }

    #[test]
    fn lookup_overrides_and_skips_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("KEEL_OUTBOX_LEASE_MS", "2500"),
            ("KEEL_BROKER_SERVE_INTERVAL_MS", "fast"),
            ("KEEL_PROJECTION_BATCH_LIMIT", "64"),
        ]);
        let config = KernelConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.outbox_lease(), Duration::from_millis(2500));
        assert_eq!(config.broker_serve_interval(), Duration::from_millis(100));
        assert_eq!(config.projection_batch_limit, Some(64));
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: KernelConfig =
            serde_json::from_str(r#"{ "store_timeout_ms": 250 }"#).unwrap();
        assert_eq!(config.store_timeout(), Duration::from_millis(250));
        assert_eq!(config.outbox_relay_interval(), Duration::from_secs(1));
    }

    #[test]
    fn builders_round_to_millis() {
        let config = KernelConfig::default()
            .with_outbox_relay_interval(Duration::from_micros(1_500))
            .with_projection_batch_limit(Some(10));
        assert_eq!(config.outbox_relay_interval_ms, 1);
        assert_eq!(config.projection_batch_limit, Some(10));
    }

    #[test]
    fn zero_durations_keep_defaults() {
        let config = KernelConfig::from_lookup(|key| key.ends_with("_MS").then(|| "0".into()));
        assert_eq!(config, KernelConfig::default());
    }
}
