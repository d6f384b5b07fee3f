//! Server configuration.
//!
//! Loaded from environment variables with defaults; a `.env` file is read
//! first by the binary.

use bookwell_booking::{ParticipantId, Role};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listener and process settings
    pub server: ServerConfig,
    /// WebSocket limits and keep-alive
    pub websocket: WsConfig,
    /// Accepted bearer tokens
    #[serde(default)]
    pub tokens: Vec<TokenGrant>,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Log filter (trace, debug, info, warn, error or a full directive)
    pub log_level: String,
    /// Metrics exporter host
    pub metrics_host: String,
    /// Metrics exporter port; 0 disables the exporter
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

impl ServerConfig {
    /// Address of the HTTP listener
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Address of the metrics exporter, if enabled and valid
    #[must_use]
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        if self.metrics_port == 0 {
            return None;
        }
        format!("{}:{}", self.metrics_host, self.metrics_port)
            .parse()
            .ok()
    }
}

/// WebSocket configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WsConfig {
    /// Seconds between server pings
    pub ping_interval: u64,
    /// Seconds without any client frame before the server closes the socket
    pub idle_timeout: u64,
    /// Concurrent sockets accepted before answering 503
    pub max_connections: usize,
}

impl WsConfig {
    /// Ping interval as a [`Duration`]
    #[must_use]
    pub const fn ping_every(&self) -> Duration {
        Duration::from_secs(self.ping_interval)
    }

    /// Idle timeout as a [`Duration`]
    #[must_use]
    pub const fn idle_after(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval: 30,
            idle_timeout: 300,
            max_connections: 1000,
        }
    }
}

/// One accepted bearer token and who it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub participant: ParticipantId,
    pub role: Role,
}

impl TokenGrant {
    /// Parse `token:participant-uuid:role`.
    #[must_use]
    pub fn parse(entry: &str) -> Option<Self> {
        let mut parts = entry.trim().splitn(3, ':');
        let token = parts.next().filter(|t| !t.is_empty())?;
        let participant = parts.next()?.parse().ok()?;
        let role = match parts.next()? {
            "requester" => Role::Requester,
            "fulfiller" => Role::Fulfiller,
            _ => return None,
        };
        Some(Self {
            token: token.to_string(),
            participant,
            role,
        })
    }
}

/// Parse a comma-separated `BOOKWELL_TOKENS` value, skipping bad entries.
#[must_use]
pub fn parse_tokens(raw: &str) -> Vec<TokenGrant> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| {
            let grant = TokenGrant::parse(entry);
            if grant.is_none() {
                tracing::warn!("Ignoring malformed BOOKWELL_TOKENS entry");
            }
            grant
        })
        .collect()
}

fn var_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let ws = WsConfig::default();
        Self {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: var_or("PORT", 8080),
                log_level: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "bookwell_web=info,tower_http=debug".to_string()),
                metrics_host: env::var("METRICS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                metrics_port: var_or("METRICS_PORT", 9090),
                shutdown_timeout: var_or("SHUTDOWN_TIMEOUT", 30),
            },
            websocket: WsConfig {
                ping_interval: var_or("WS_PING_INTERVAL", ws.ping_interval),
                idle_timeout: var_or("WS_IDLE_TIMEOUT", ws.idle_timeout),
                max_connections: var_or("WS_MAX_CONNECTIONS", ws.max_connections),
            },
            tokens: env::var("BOOKWELL_TOKENS")
                .map(|raw| parse_tokens(&raw))
                .unwrap_or_default(),
        }
    }
}
