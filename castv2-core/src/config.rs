//! Connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::namespace::DEFAULT_PORT;

/// Settings for one device connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Device address (IP or host name).
    pub host: String,
    /// Control channel port.
    pub port: u16,
    /// Bounds TCP connect, TLS handshake and the authentication reply.
    pub connect_timeout_ms: u64,
    /// Default wait for a correlated reply.
    pub request_timeout_ms: u64,
    /// Interval between keepalive pings.
    pub keepalive_interval_ms: u64,
    /// Reopen a closed connection on the next operation.
    pub auto_reconnect: bool,
    /// Fixed sender identity; generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    /// Transport security.
    pub tls: TlsConfig,
}

/// Transport security settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Use TLS. Plaintext is only useful for local stubs and proxies.
    pub enabled: bool,
    /// Accept any server certificate. Receivers present self-signed ones.
    pub trust_any_certificate: bool,
    /// SNI / verification name; defaults to `host`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            keepalive_interval_ms: 30_000,
            auto_reconnect: true,
            sender_id: None,
            tls: TlsConfig::default(),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trust_any_certificate: true,
            server_name: None,
        }
    }
}

// ── Accessors ────────────────────────────────────────────────────

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Same settings with TLS turned off.
    pub fn plaintext(mut self) -> Self {
        self.tls.enabled = false;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Name presented for SNI and certificate checks.
    pub fn server_name(&self) -> &str {
        self.tls.server_name.as_deref().unwrap_or(&self.host)
    }
}
