//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults
//! - TOML configuration file (`RELAY_CONFIG`, or the first of the default paths that exists)
//! - Environment variables (`RELAY_PORT`, `RELAY_BROKER__INBOX_CAPACITY`, ...)

use anyhow::{ensure, Context, Result};
use relay_core::BrokerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "RELAY_CONFIG";

/// Prefix of environment overrides.
const ENV_PREFIX: &str = "RELAY";

/// Files searched when `RELAY_CONFIG` is unset.
const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "relay.toml",
    "/etc/relay/relay.toml",
    "~/.config/relay/relay.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// HTTP route configuration.
    #[serde(default)]
    pub routes: RoutesConfig,

    /// Broker configuration.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// HTTP route configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutesConfig {
    /// Prefix of producer endpoints (`{prefix}/:app/:stream`).
    #[serde(default = "default_publish_prefix")]
    pub publish_prefix: String,

    /// Prefix of consumer endpoints (`{prefix}/:app/:stream`).
    #[serde(default = "default_subscribe_prefix")]
    pub subscribe_prefix: String,

    /// Directory served for every other path (player page and its assets).
    #[serde(default)]
    pub static_dir: Option<String>,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum size of one inbound WebSocket chunk in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_publish_prefix() -> String {
    "/publish".to_string()
}

fn default_subscribe_prefix() -> String {
    "/subscribe".to_string()
}

fn default_max_chunk_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            routes: RoutesConfig::default(),
            broker: BrokerConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            publish_prefix: default_publish_prefix(),
            subscribe_prefix: default_subscribe_prefix(),
            static_dir: None,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, an
    /// override has the wrong type, or the result fails validation.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).ok().or_else(|| {
            DEFAULT_CONFIG_PATHS
                .iter()
                .map(|path| shellexpand::tilde(path).into_owned())
                .find(|path| Path::new(path).exists())
        });

        Self::layered(path.as_deref(), None)
    }

    /// Build configuration from an optional file plus environment overrides.
    ///
    /// `env` replaces the process environment when given.
    fn layered(path: Option<&str>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::new(path, ::config::FileFormat::Toml).required(true),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: Config = builder
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.broker.inbox_capacity >= 1,
            "broker.inbox_capacity must be at least 1"
        );
        ensure!(self.limits.max_chunk_size > 0, "limits.max_chunk_size must be positive");
        for prefix in [&self.routes.publish_prefix, &self.routes.subscribe_prefix] {
            ensure!(
                prefix.starts_with('/') && !prefix.ends_with('/'),
                "route prefix {prefix:?} must start with '/' and not end with '/'"
            );
        }
        ensure!(
            self.routes.publish_prefix != self.routes.subscribe_prefix,
            "publish and subscribe prefixes must differ"
        );
        if let Some(dir) = &self.routes.static_dir {
            ensure!(!dir.is_empty(), "routes.static_dir must not be empty when set");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::OverflowPolicy;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.routes.publish_prefix, "/publish");
        assert!(config.routes.static_dir.is_none());
        assert_eq!(config.broker.inbox_capacity, 1);
        assert_eq!(config.broker.overflow, OverflowPolicy::DropOldest);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [broker]
            inbox_capacity = 4
            overflow = "drop-newest"

            [limits]
            max_chunk_size = 65536
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.broker.inbox_capacity, 4);
        assert_eq!(config.broker.overflow, OverflowPolicy::DropNewest);
        assert!(config.broker.prune_empty_topics);
        assert_eq!(config.limits.max_chunk_size, 65536);
        assert_eq!(config.routes.subscribe_prefix, "/subscribe");
    }

    #[test]
    fn test_config_file_layer() {
        let path = std::env::temp_dir().join(format!("relay-config-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "port = 9001\n[routes]\npublish_prefix = \"/ingest\"\nstatic_dir = \"./www\"\n",
        )
        .unwrap();

        let env = HashMap::from([("RELAY_PORT".to_string(), "9002".to_string())]);
        let config = Config::layered(path.to_str(), Some(env)).unwrap();
        std::fs::remove_file(&path).unwrap();

        // Environment wins over the file, the file over the defaults.
        assert_eq!(config.port, 9002);
        assert_eq!(config.routes.publish_prefix, "/ingest");
        assert_eq!(config.routes.subscribe_prefix, "/subscribe");
        assert_eq!(config.routes.static_dir.as_deref(), Some("./www"));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let path = std::env::temp_dir().join("relay-config-does-not-exist.toml");
        assert!(Config::layered(path.to_str(), Some(HashMap::new())).is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let env = HashMap::from([
            ("RELAY_PORT".to_string(), "9100".to_string()),
            ("RELAY_BROKER__INBOX_CAPACITY".to_string(), "2".to_string()),
            ("RELAY_METRICS__ENABLED".to_string(), "false".to_string()),
        ]);

        let config = Config::layered(None, Some(env)).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.broker.inbox_capacity, 2);
        assert!(!config.metrics.enabled);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let env = HashMap::from([(
            "RELAY_BROKER__INBOX_CAPACITY".to_string(),
            "0".to_string(),
        )]);
        assert!(Config::layered(None, Some(env)).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_prefixes() {
        let mut config = Config::default();
        config.routes.subscribe_prefix = "/publish".to_string();
        assert!(config.validate().is_err());

        config.routes.subscribe_prefix = "subscribe".to_string();
        assert!(config.validate().is_err());
    }
}
