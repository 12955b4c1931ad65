//! Server configuration (ambient concern; §AMBIENT-3).
//!
//! Mirrors the teacher's `serde_yaml`-backed `Config::load` + `validate()`
//! shape, scaled down to what the connection core actually needs: which
//! transport dialect to speak, the per-request timeout, and the identity it
//! echoes back from `initialize`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RichError;
use crate::transport::Dialect;

/// Which wire dialect the stdio transport speaks. HTTP always behaves as a
/// single request/response body and ignores this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    LineDelimited,
    HeaderFramed,
}

impl From<TransportKind> for Dialect {
    fn from(kind: TransportKind) -> Self {
        match kind {
            TransportKind::LineDelimited => Dialect::LineDelimited,
            TransportKind::HeaderFramed => Dialect::HeaderFramed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfoConfig {
    #[serde(default = "default_server_name")]
    pub name: String,
    #[serde(default = "default_server_version")]
    pub version: String,
}

fn default_server_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for ServerInfoConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            version: default_server_version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: TransportKind,
    /// Per-request dispatcher timeout, in seconds (§4.3 "default 30 s").
    pub request_timeout_secs: u64,
    pub server_info: ServerInfoConfig,
    /// Passed to `tracing_subscriber::EnvFilter` when `RUST_LOG` is unset.
    pub log_level: String,
    pub http_bind: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::HeaderFramed,
            request_timeout_secs: 30,
            server_info: ServerInfoConfig::default(),
            log_level: "info".to_string(),
            http_bind: None,
        }
    }
}

impl ServerConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, RichError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RichError::new(
                crate::error::ErrorKind::InternalError,
                crate::error::ErrorCategory::Config,
                format!("failed to read config file `{}`: {e}", path.display()),
            )
        })?;
        let config: Self = serde_yaml::from_str(&contents).map_err(|e| {
            RichError::new(
                crate::error::ErrorKind::InternalError,
                crate::error::ErrorCategory::Config,
                format!("failed to parse config file `{}`: {e}", path.display()),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RichError> {
        if self.request_timeout_secs == 0 {
            return Err(RichError::new(
                crate::error::ErrorKind::InternalError,
                crate::error::ErrorCategory::Config,
                "request_timeout_secs must be greater than zero",
            ));
        }
        if self.server_info.name.is_empty() {
            return Err(RichError::new(
                crate::error::ErrorKind::InternalError,
                crate::error::ErrorCategory::Config,
                "server_info.name must not be empty",
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        ServerConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let mut config = ServerConfig::default();
        config.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_from_yaml() {
        let yaml = "transport: line-delimited\nrequest_timeout_secs: 10\n";
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.transport, TransportKind::LineDelimited);
        assert_eq!(config.request_timeout_secs, 10);
    }
}
