//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The master key is loaded from BROKER_MASTER_KEY env var or master_key_file,
//! never stored in the TOML directly to avoid leaking secrets.

use broker_core::ServiceDefinition;
use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MASTER_KEY_ENV: &str = "BROKER_MASTER_KEY";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Service catalog registered at startup.
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
}

/// Listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Credential administration. Keep it off public interfaces.
    pub admin_listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Broker runtime settings
#[derive(Debug, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Path to a file containing the master key (alternative to BROKER_MASTER_KEY)
    #[serde(default)]
    pub master_key_file: Option<PathBuf>,
    #[serde(skip)]
    pub master_key: Option<Secret<String>>,
    /// Register the demo catalog, pooled accounts and users at startup.
    #[serde(default)]
    pub seed_demo: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            master_key_file: None,
            master_key: None,
            seed_demo: false,
        }
    }
}

impl BrokerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_sweep_interval() -> u64 {
    60
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Master key resolution order:
    /// 1. BROKER_MASTER_KEY env var
    /// 2. master_key_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.broker.sweep_interval_secs == 0 {
            return Err(common::Error::Config(
                "sweep_interval_secs must be greater than 0".into(),
            ));
        }

        for service in &config.services {
            if service.max_concurrent_streams == 0 {
                return Err(common::Error::Config(format!(
                    "service {}: max_concurrent_streams must be greater than 0",
                    service.id
                )));
            }
        }

        // Env var takes precedence over file
        if let Ok(key) = std::env::var(MASTER_KEY_ENV) {
            if !key.is_empty() {
                config.broker.master_key = Some(Secret::new(key));
            }
        }
        if config.broker.master_key.is_none() {
            if let Some(ref key_file) = config.broker.master_key_file {
                let key = std::fs::read_to_string(key_file).map_err(|e| {
                    common::Error::Config(format!(
                        "failed to read master_key_file {}: {e}",
                        key_file.display()
                    ))
                })?;
                let key = key.trim().to_owned();
                if !key.is_empty() {
                    config.broker.master_key = Some(Secret::new(key));
                }
            }
        }

        if config.broker.master_key.is_none() {
            return Err(common::Error::Config(format!(
                "no master key: set {MASTER_KEY_ENV} or broker.master_key_file"
            )));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("pool-broker.toml")
    }
}
