use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::client::RetainPolicy;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_ms(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Broker / REST server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// HMAC secret for bearer tokens. Random per process when unset.
    pub token_secret: String,
    /// Whether `token_secret` came from the environment.
    pub token_secret_configured: bool,
    /// Issue and log an admin token for this subject at startup.
    pub bootstrap_admin: Option<String>,
    /// Heart-beat the broker offers to send (ms, 0 = never).
    pub heartbeat_send_ms: u64,
    /// Heart-beat the broker wants to receive (ms, 0 = never).
    pub heartbeat_recv_ms: u64,
    /// Time a new socket has to send CONNECT.
    pub handshake_timeout: Duration,
    /// Notifications kept in memory.
    pub notification_retention: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let token_secret = env::var("BLOGWIRE_TOKEN_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            token_secret_configured: token_secret.is_some(),
            token_secret: token_secret.unwrap_or(defaults.token_secret),
            bootstrap_admin: env::var("BLOGWIRE_BOOTSTRAP_ADMIN")
                .ok()
                .filter(|s| !s.is_empty()),
            heartbeat_send_ms: env_or("BROKER_HEARTBEAT_SEND_MS", defaults.heartbeat_send_ms),
            heartbeat_recv_ms: env_or("BROKER_HEARTBEAT_RECV_MS", defaults.heartbeat_recv_ms),
            handshake_timeout: env_ms("BROKER_HANDSHAKE_TIMEOUT_MS", defaults.handshake_timeout),
            notification_retention: env_or(
                "NOTIFICATION_RETENTION",
                defaults.notification_retention,
            ),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            token_secret: uuid::Uuid::new_v4().simple().to_string(),
            token_secret_configured: false,
            bootstrap_admin: None,
            heartbeat_send_ms: 10_000,
            heartbeat_recv_ms: 10_000,
            handshake_timeout: Duration::from_secs(10),
            notification_retention: 500,
        }
    }
}

/// Client-side hub configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker WebSocket endpoint.
    pub ws_url: String,
    /// REST base URL for the unread baseline; `None` skips the fetch.
    pub api_url: Option<String>,
    /// Bearer token for CONNECT and REST calls.
    pub token: Option<String>,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// How often we offer to send heart-beats.
    pub heartbeat_outgoing: Duration,
    /// How often we want to hear from the broker.
    pub heartbeat_incoming: Duration,
    /// Bound on socket open plus CONNECTED.
    pub connect_timeout: Duration,
    /// Ingestion buffer capacity.
    pub notification_buffer: usize,
    /// Notifications exposed in hub snapshots.
    pub notification_view: usize,
    /// Visible toasts.
    pub toast_capacity: usize,
    /// Toast lifetime.
    pub toast_ttl: Duration,
    pub retain_policy: RetainPolicy,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_url = match env::var("BLOGWIRE_API_URL") {
            Ok(url) if url.trim().is_empty() => None,
            Ok(url) => Some(url),
            Err(_) => defaults.api_url,
        };

        Self {
            ws_url: env::var("BLOGWIRE_WS_URL").unwrap_or(defaults.ws_url),
            api_url,
            token: env::var("BLOGWIRE_TOKEN").ok().filter(|t| !t.is_empty()),
            reconnect_delay: env_ms("RECONNECT_DELAY_MS", defaults.reconnect_delay),
            heartbeat_outgoing: env_ms("HEARTBEAT_OUTGOING_MS", defaults.heartbeat_outgoing),
            heartbeat_incoming: env_ms("HEARTBEAT_INCOMING_MS", defaults.heartbeat_incoming),
            connect_timeout: env_ms("CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            notification_buffer: env_or("NOTIFICATION_BUFFER", defaults.notification_buffer),
            notification_view: env_or("NOTIFICATION_VIEW", defaults.notification_view),
            toast_capacity: env_or("TOAST_CAPACITY", defaults.toast_capacity),
            toast_ttl: env_ms("TOAST_TTL_MS", defaults.toast_ttl),
            retain_policy: env::var("RETAIN_POLICY")
                .ok()
                .and_then(|v| RetainPolicy::parse(&v))
                .unwrap_or(defaults.retain_policy),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8080/ws".to_string(),
            api_url: Some("http://127.0.0.1:8080".to_string()),
            token: None,
            reconnect_delay: Duration::from_millis(5000),
            heartbeat_outgoing: Duration::from_millis(10_000),
            heartbeat_incoming: Duration::from_millis(10_000),
            connect_timeout: Duration::from_millis(10_000),
            notification_buffer: 50,
            notification_view: 20,
            toast_capacity: 3,
            toast_ttl: Duration::from_millis(5000),
            retain_policy: RetainPolicy::ApplicationLifetime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.heartbeat_outgoing, Duration::from_secs(10));
        assert_eq!(config.heartbeat_incoming, Duration::from_secs(10));
        assert_eq!(config.notification_buffer, 50);
        assert_eq!(config.notification_view, 20);
        assert_eq!(config.toast_capacity, 3);
        assert_eq!(config.toast_ttl, Duration::from_millis(5000));
        assert_eq!(config.retain_policy, RetainPolicy::ApplicationLifetime);
    }

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.notification_retention, 500);
        assert!(!config.token_secret.is_empty());
        assert!(!config.token_secret_configured);
    }

    #[test]
    fn test_random_secret_differs_per_instance() {
        assert_ne!(ServerConfig::default().token_secret, ServerConfig::default().token_secret);
    }
}
