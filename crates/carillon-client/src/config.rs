//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a local backend works with zero
//! configuration.

use std::time::Duration;

use carillon_net::{Backoff, RetryPolicy, TransportConfig};
use carillon_shared::constants::{
    CHANNEL_CAPACITY, DEFAULT_API_URL, DEFAULT_BROKER_URL, DEFAULT_HEARTBEAT_MS,
    DEFAULT_SEND_MAX_ATTEMPTS, DEFAULT_SEND_TIMEOUT_MS, OFFLINE_BROKER_URL,
};
use carillon_shared::types::{Credentials, UserId};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// STOMP-over-WebSocket endpoint. `memory` runs offline against an
    /// in-process loopback broker.
    /// Env: `CARILLON_BROKER_URL`
    /// Default: `ws://localhost:8080/ws`
    pub broker_url: String,

    /// REST API base URL.
    /// Env: `CARILLON_API_URL`
    /// Default: `http://localhost:8080/api`
    pub api_url: String,

    /// Reconnection backoff.
    /// Env: `CARILLON_RECONNECT_MAX_ATTEMPTS`, `CARILLON_RECONNECT_BASE_MS`,
    /// `CARILLON_RECONNECT_MAX_MS`, `CARILLON_RECONNECT_BACKOFF`
    /// (`fixed`, `linear` or `exponential`)
    pub reconnect: RetryPolicy,

    /// How long an outbound notification may wait for a connection.
    /// Env: `CARILLON_SEND_TIMEOUT_MS`
    pub send_timeout: Duration,

    /// Failed connection attempts an outbound notification may witness.
    /// Env: `CARILLON_SEND_MAX_ATTEMPTS`
    pub send_max_attempts: u32,

    /// Heart-beat interval, 0 disables.
    /// Env: `CARILLON_HEARTBEAT_MS`
    pub heartbeat: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            reconnect: RetryPolicy::default(),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            send_max_attempts: DEFAULT_SEND_MAX_ATTEMPTS,
            heartbeat: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("CARILLON_BROKER_URL") {
            config.broker_url = url;
        }

        if let Some(url) = lookup("CARILLON_API_URL") {
            config.api_url = url;
        }

        if let Some(n) = parse_var(&lookup, "CARILLON_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = n;
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "CARILLON_RECONNECT_BASE_MS") {
            config.reconnect.base_delay = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "CARILLON_RECONNECT_MAX_MS") {
            config.reconnect.max_delay = Duration::from_millis(ms);
        }

        if let Some(backoff) = parse_var::<Backoff>(&lookup, "CARILLON_RECONNECT_BACKOFF") {
            config.reconnect.backoff = backoff;
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "CARILLON_SEND_TIMEOUT_MS") {
            config.send_timeout = Duration::from_millis(ms);
        }

        if let Some(n) = parse_var(&lookup, "CARILLON_SEND_MAX_ATTEMPTS") {
            config.send_max_attempts = n;
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "CARILLON_HEARTBEAT_MS") {
            config.heartbeat = Duration::from_millis(ms);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    /// Whether the broker URL selects the in-process loopback broker.
    pub fn is_offline(&self) -> bool {
        self.broker_url.trim().eq_ignore_ascii_case(OFFLINE_BROKER_URL)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            endpoint: self.broker_url.clone(),
            reconnect: self.reconnect.clone(),
            send_timeout: self.send_timeout,
            send_retry: RetryPolicy::new(self.send_max_attempts, Duration::ZERO),
            heartbeat: self.heartbeat,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Credentials for the command-line client.
/// Env: `CARILLON_USER_ID`, `CARILLON_TOKEN`
pub fn credentials_from_env() -> Option<Credentials> {
    credentials_from_lookup(|key| std::env::var(key).ok())
}

fn credentials_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Credentials> {
    let user_id = parse_var::<i64>(&lookup, "CARILLON_USER_ID")?;
    let token = lookup("CARILLON_TOKEN").filter(|t| !t.is_empty())?;
    Some(Credentials::new(UserId(user_id), token))
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::from_lookup(lookup(&[]));
        assert_eq!(config.broker_url, "ws://localhost:8080/ws");
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.send_timeout, Duration::from_secs(10));
        assert!(!config.is_offline());
    }

    #[test]
    fn test_memory_url_selects_offline_mode() {
        let config = ClientConfig::from_lookup(lookup(&[("CARILLON_BROKER_URL", "memory")]));
        assert!(config.is_offline());
        assert_eq!(config.transport().endpoint, "memory");
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("CARILLON_BROKER_URL", "wss://broker.example.com/ws"),
            ("CARILLON_RECONNECT_MAX_ATTEMPTS", "8"),
            ("CARILLON_RECONNECT_BACKOFF", "linear"),
            ("CARILLON_SEND_TIMEOUT_MS", "soon"),
            ("CARILLON_HEARTBEAT_MS", "0"),
        ]));
        assert_eq!(config.broker_url, "wss://broker.example.com/ws");
        assert_eq!(config.reconnect.max_attempts, 8);
        assert_eq!(config.reconnect.backoff, Backoff::Linear);
        assert_eq!(config.send_timeout, Duration::from_secs(10));

        let transport = config.transport();
        assert_eq!(transport.heartbeat, Duration::ZERO);
        assert_eq!(transport.send_retry.max_attempts, 3);
    }

    #[test]
    fn test_credentials_require_both_values() {
        assert!(credentials_from_lookup(lookup(&[("CARILLON_USER_ID", "3")])).is_none());
        let creds = credentials_from_lookup(lookup(&[
            ("CARILLON_USER_ID", "3"),
            ("CARILLON_TOKEN", "secret"),
        ]))
        .unwrap();
        assert_eq!(creds.user_id, UserId(3));
    }
}
