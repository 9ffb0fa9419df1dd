//! Server settings, layered from a `.env` file, an optional
//! `folio-server.{toml,yaml,json}` file and `FOLIO_SERVER__*` variables.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const FILE_STEM: &str = "folio-server";
const ENV_PREFIX: &str = "FOLIO_SERVER";

/// Settings for the observability and admin server.
///
/// Missing fields take their value from [`ServerConfig::default`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Whole-request budget, in seconds. Overruns answer 408.
    pub timeout_secs: u64,
    /// Admitted `/api/v1` requests per key per minute.
    pub rate_limit_per_minute: u32,
    /// Keys accepted on the `/api/v1` routes.
    pub api_keys: HashSet<String>,
    pub enable_cors: bool,
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_level: String,
    /// Install the Prometheus recorder and serve `/metrics`.
    pub metrics_enabled: bool,
    /// YAML file for the Folio components; defaults apply when unset.
    pub folio_config: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 8080,
            timeout_secs: 30,
            rate_limit_per_minute: 100,
            api_keys: HashSet::new(),
            enable_cors: true,
            log_level: "info".into(),
            metrics_enabled: true,
            folio_config: None,
        }
    }
}

impl ServerConfig {
    /// Reads every layer, later ones overriding earlier ones, and validates
    /// the result.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "read .env");
        }

        let layered = config::Config::builder()
            .add_source(config::File::with_name(FILE_STEM).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("api_keys")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Self = layered.try_deserialize()?;
        settings.validate()?;
        if settings.api_keys.is_empty() {
            tracing::warn!("no API keys configured, /api/v1 will reject every request");
        }
        Ok(settings)
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.timeout_secs == 0 {
            return Err(ServerError::Config("timeout_secs must be > 0".into()));
        }
        if self.rate_limit_per_minute == 0 {
            return Err(ServerError::Config(
                "rate_limit_per_minute must be > 0".into(),
            ));
        }
        if self.api_keys.iter().any(|key| key.trim().is_empty()) {
            return Err(ServerError::Config("api_keys must not contain blanks".into()));
        }
        self.socket_addr().map(drop)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(format!("{}:{}", self.bind_addr, self.port).parse()?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_keys.insert(key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = ServerConfig::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.socket_addr().unwrap().port(), 8080);
        assert_eq!(settings.timeout(), Duration::from_secs(30));
        assert!(settings.metrics_enabled);
        assert!(settings.folio_config.is_none());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: ServerConfig =
            serde_json::from_str(r#"{"port": 9090, "api_keys": ["k1"]}"#).unwrap();
        assert_eq!(settings.port, 9090);
        assert!(settings.api_keys.contains("k1"));
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.rate_limit_per_minute, 100);
    }

    #[test]
    fn zero_budgets_are_rejected() {
        let no_timeout = ServerConfig {
            timeout_secs: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(
            no_timeout.validate(),
            Err(ServerError::Config(msg)) if msg.contains("timeout_secs")
        ));

        let no_requests = ServerConfig {
            rate_limit_per_minute: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(
            no_requests.validate(),
            Err(ServerError::Config(msg)) if msg.contains("rate_limit")
        ));
    }

    #[test]
    fn blank_keys_and_bad_addresses_are_rejected() {
        assert!(ServerConfig::default().with_api_key(" ").validate().is_err());

        let unbindable = ServerConfig {
            bind_addr: "not an address".into(),
            ..ServerConfig::default()
        };
        assert!(matches!(unbindable.socket_addr(), Err(ServerError::Config(_))));
        assert!(unbindable.validate().is_err());
    }
}
