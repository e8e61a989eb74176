//! Realtime client configuration from environment variables.

use std::time::Duration;

use shiftwire_shared::RealtimeError;

use crate::endpoint;
use crate::ws::ReconnectConfig;

pub const DEFAULT_API_BASE: &str = "http://localhost:8080";
pub const DEFAULT_WS_PATH: &str = "/ws/realtime";

/// Tunables for a [`RealtimeManager`](crate::ws::RealtimeManager).
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// HTTP base of the API; the socket URL is derived from it.
    pub api_base: String,
    /// Path of the realtime endpoint, appended to `api_base`.
    pub ws_path: String,
    /// Upper bound on token fetch plus WebSocket handshake.
    pub connect_timeout: Duration,
    /// Interval between `ping` frames while authenticated.
    pub heartbeat_interval: Duration,
    /// Grace period before closing once the last subscriber leaves.
    pub idle_disconnect_delay: Duration,
    /// Outbound messages kept while unauthenticated; the oldest is dropped
    /// beyond this.
    pub max_queued: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            connect_timeout: Duration::from_millis(10_000),
            heartbeat_interval: Duration::from_millis(30_000),
            idle_disconnect_delay: Duration::from_millis(1_000),
            max_queued: 1024,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl RealtimeConfig {
    /// Read configuration from the environment.
    ///
    /// Environment variables:
    /// - `SHIFTWIRE_API_BASE` (default: "http://localhost:8080")
    /// - `SHIFTWIRE_WS_PATH` (default: "/ws/realtime")
    /// - `SHIFTWIRE_CONNECT_TIMEOUT_MS` (default: 10000)
    /// - `SHIFTWIRE_HEARTBEAT_MS` (default: 30000)
    /// - `SHIFTWIRE_IDLE_DISCONNECT_MS` (default: 1000)
    /// - `SHIFTWIRE_MAX_QUEUED` (default: 1024)
    /// - `SHIFTWIRE_RECONNECT_DELAY_MS` (default: 1000)
    /// - `SHIFTWIRE_MAX_RECONNECT_DELAY_MS` (default: 30000)
    /// - `SHIFTWIRE_MAX_RECONNECT_ATTEMPTS` (default: 5)
    ///
    /// Unparseable numbers are logged and replaced by the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |name: &str, default: u64| parse_number(name, lookup(name), default);
        let millis = |name: &str, default: Duration| {
            Duration::from_millis(number(name, default.as_millis() as u64))
        };

        let reconnect = ReconnectConfig {
            initial_delay_ms: number(
                "SHIFTWIRE_RECONNECT_DELAY_MS",
                defaults.reconnect.initial_delay_ms,
            ),
            max_delay_ms: number(
                "SHIFTWIRE_MAX_RECONNECT_DELAY_MS",
                defaults.reconnect.max_delay_ms,
            ),
            max_attempts: number(
                "SHIFTWIRE_MAX_RECONNECT_ATTEMPTS",
                u64::from(defaults.reconnect.max_attempts),
            )
            .try_into()
            .unwrap_or(u32::MAX),
            ..defaults.reconnect
        };

        Self {
            api_base: lookup("SHIFTWIRE_API_BASE").unwrap_or(defaults.api_base),
            ws_path: lookup("SHIFTWIRE_WS_PATH").unwrap_or(defaults.ws_path),
            connect_timeout: millis("SHIFTWIRE_CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            heartbeat_interval: millis("SHIFTWIRE_HEARTBEAT_MS", defaults.heartbeat_interval),
            idle_disconnect_delay: millis(
                "SHIFTWIRE_IDLE_DISCONNECT_MS",
                defaults.idle_disconnect_delay,
            ),
            max_queued: number("SHIFTWIRE_MAX_QUEUED", defaults.max_queued as u64)
                .try_into()
                .unwrap_or(usize::MAX),
            reconnect,
        }
    }

    /// The WebSocket URL for this configuration.
    pub fn realtime_url(&self) -> Result<String, RealtimeError> {
        endpoint::realtime_url(&self.api_base, &self.ws_path)
    }
}

fn parse_number(name: &str, raw: Option<String>, default: u64) -> u64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            crate::log_warn!("Ignoring invalid {}={:?}; using {}", name, raw, default);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = RealtimeConfig::from_lookup(lookup(&[]));
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.idle_disconnect_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.initial_delay_ms, 1000);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
        assert_eq!(
            config.realtime_url().unwrap(),
            "ws://localhost:8080/ws/realtime"
        );
    }

    #[test]
    fn overrides_are_applied() {
        let config = RealtimeConfig::from_lookup(lookup(&[
            ("SHIFTWIRE_API_BASE", "https://rt.example.com"),
            ("SHIFTWIRE_HEARTBEAT_MS", "5000"),
            ("SHIFTWIRE_MAX_RECONNECT_ATTEMPTS", "9"),
            ("SHIFTWIRE_MAX_QUEUED", "16"),
        ]));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.reconnect.max_attempts, 9);
        assert_eq!(config.max_queued, 16);
        assert_eq!(
            config.realtime_url().unwrap(),
            "wss://rt.example.com/ws/realtime"
        );
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = RealtimeConfig::from_lookup(lookup(&[
            ("SHIFTWIRE_CONNECT_TIMEOUT_MS", "soon"),
            ("SHIFTWIRE_RECONNECT_DELAY_MS", "-1"),
        ]));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect.initial_delay_ms, 1000);
    }
}
