//! castctl configuration.

use std::path::Path;

use castv2_core::ConnectionConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Device address, timeouts and TLS policy.
    pub device: ConnectionConfig,
    pub logging: LoggingConfig,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive; `RUST_LOG` wins when set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CliConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::debug!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Write the default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = Self::default().to_toml().map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = CliConfig::default().to_toml().unwrap();
        assert!(text.contains("[device]"));
        assert!(text.contains("keepalive_interval_ms"));
        assert!(text.contains("[device.tls]"));
        assert!(text.contains("[logging]"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = CliConfig::parse(
            r#"
            [device]
            host = "192.168.1.20"

            [device.tls]
            server_name = "living-room"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.device.host, "192.168.1.20");
        assert_eq!(cfg.device.port, 8009);
        assert!(cfg.device.tls.enabled);
        assert_eq!(cfg.device.tls.server_name.as_deref(), Some("living-room"));
        assert_eq!(cfg.logging.level, "warn");
    }

    #[test]
    fn missing_file_falls_back() {
        let cfg = CliConfig::load(Path::new("/nonexistent/castctl.toml"));
        assert_eq!(cfg.device.request_timeout_ms, 30_000);
    }

    #[test]
    fn write_default_then_load() {
        let path = std::env::temp_dir().join(format!("castctl-{}.toml", std::process::id()));
        CliConfig::write_default(&path).unwrap();
        let cfg = CliConfig::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(cfg.device.host, "127.0.0.1");
        assert!(cfg.device.auto_reconnect);
    }
}
