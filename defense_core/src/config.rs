//! Runtime configuration for the air-defense service.
//!
//! Loaded from `configuration.json` with support for an environment variable
//! override, falling back to the built-in defaults.

use std::{
    collections::HashSet,
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use defense_rpc::StreamUnitsOptions;
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_CONFIGURATION: &str = include_str!("data/configuration.json");

pub const CONFIG_PATH_ENV: &str = "AIR_DEFENSE_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "configuration.json";

/// Root configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub game_servers: Vec<GameServer>,
    pub defender: DefenderConfig,
    pub descriptor_cache_dir: PathBuf,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            game_servers: Vec::new(),
            defender: DefenderConfig::default(),
            descriptor_cache_dir: PathBuf::from("Cache/Descriptors"),
        }
    }
}

/// One upstream mission server. Each gets its own Defender.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GameServer {
    pub name: String,
    #[serde(alias = "shortName")]
    pub short_name: String,
    pub rpc: RpcEndpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcEndpoint {
    pub host: String,
    pub port: u16,
}

/// Timing knobs shared by every Defender.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DefenderConfig {
    pub monitor_interval_ms: u64,
    pub restart_cooldown_ms: u64,
    pub queue_poll_ms: u64,
    pub stream_poll_rate: u32,
    pub stream_max_backoff: u32,
    pub rpc_timeout_ms: u64,
}

impl Default for DefenderConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: 10_000,
            restart_cooldown_ms: 10_000,
            queue_poll_ms: 5,
            stream_poll_rate: 1,
            stream_max_backoff: 30,
            rpc_timeout_ms: 5_000,
        }
    }
}

impl DefenderConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_millis(self.restart_cooldown_ms)
    }

    pub fn queue_poll(&self) -> Duration {
        Duration::from_millis(self.queue_poll_ms)
    }

    /// Bound on connection setup and on each unary call (descriptor fetch,
    /// alarm command).
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn stream_options(&self) -> StreamUnitsOptions {
        StreamUnitsOptions {
            poll_rate: self.stream_poll_rate,
            max_backoff: self.stream_max_backoff,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read configuration from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Configuration {
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_json_str(BUILTIN_CONFIGURATION)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Configuration = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Configuration::from_json_str(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut short_names = HashSet::new();
        for server in &self.game_servers {
            if server.short_name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "game server '{}' has an empty short_name",
                    server.name
                )));
            }
            if server.rpc.host.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "game server '{}' has an empty rpc host",
                    server.short_name
                )));
            }
            if !short_names.insert(server.short_name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate game server short_name '{}'",
                    server.short_name
                )));
            }
        }
        if self.defender.monitor_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "defender.monitor_interval_ms must be positive".to_string(),
            ));
        }
        if self.defender.rpc_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "defender.rpc_timeout_ms must be positive".to_string(),
            ));
        }
        if self.defender.queue_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "defender.queue_poll_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationMetadata {
    path: Option<PathBuf>,
}

impl ConfigurationMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// `None` when the built-in configuration is in use.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

/// Load configuration from `AIR_DEFENSE_CONFIG_PATH`, else `configuration.json`
/// in the working directory, else the built-in document.
pub fn load_configuration_from_env(
) -> Result<(Arc<Configuration>, ConfigurationMetadata), ConfigError> {
    let override_path = env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
    let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);

    let candidates: Vec<PathBuf> = match override_path {
        Some(ref path) => vec![path.clone()],
        None => vec![default_path],
    };

    for path in candidates {
        match Configuration::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "air_defense::config",
                    path = %path.display(),
                    servers = config.game_servers.len(),
                    "configuration.loaded=file"
                );
                return Ok((Arc::new(config), ConfigurationMetadata::new(Some(path))));
            }
            Err(err) => {
                tracing::warn!(
                    target: "air_defense::config",
                    path = %path.display(),
                    error = %err,
                    "configuration.load_failed"
                );
            }
        }
    }

    let config = Configuration::builtin()?;
    tracing::info!(
        target: "air_defense::config",
        servers = config.game_servers.len(),
        "configuration.loaded=builtin"
    );
    Ok((Arc::new(config), ConfigurationMetadata::new(None)))
}
