//! Client configuration from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::ws::ReconnectConfig;

/// Used when `KINDERLINK_WS_URL` is unset.
pub const DEFAULT_WS_URL: &str = "ws://localhost:5000/ws";

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, without credentials.
    pub ws_url: String,
    pub reconnect: ReconnectConfig,
    /// Timeout for the subscribe round trip of bound collections.
    pub ack_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            reconnect: ReconnectConfig::default(),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Read configuration from the environment.
    ///
    /// Environment variables:
    /// - `KINDERLINK_WS_URL`: endpoint (default: `ws://localhost:5000/ws`)
    /// - `KINDERLINK_RECONNECT_BASE_MS`: first reconnect delay (default: 1000)
    /// - `KINDERLINK_RECONNECT_MULTIPLIER`: backoff multiplier (default: 1.5)
    /// - `KINDERLINK_RECONNECT_MAX_MS`: delay ceiling (default: 30000)
    /// - `KINDERLINK_RECONNECT_MAX_ATTEMPTS`: 0 retries forever (default: 0)
    /// - `KINDERLINK_ACK_TIMEOUT_MS`: subscribe ack timeout (default: 10000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let reconnect = ReconnectConfig {
            initial_delay_ms: env_or("KINDERLINK_RECONNECT_BASE_MS", defaults.reconnect.initial_delay_ms),
            backoff_multiplier: env_or(
                "KINDERLINK_RECONNECT_MULTIPLIER",
                defaults.reconnect.backoff_multiplier,
            ),
            max_delay_ms: env_or("KINDERLINK_RECONNECT_MAX_MS", defaults.reconnect.max_delay_ms),
            max_attempts: env_or("KINDERLINK_RECONNECT_MAX_ATTEMPTS", defaults.reconnect.max_attempts),
        };

        Self {
            ws_url: std::env::var("KINDERLINK_WS_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.ws_url),
            reconnect,
            ack_timeout: Duration::from_millis(env_or(
                "KINDERLINK_ACK_TIMEOUT_MS",
                defaults.ack_timeout.as_millis() as u64,
            )),
        }
    }

    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = ws_url.into();
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}
