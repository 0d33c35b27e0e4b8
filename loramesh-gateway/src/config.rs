//! Configuration for the reference gateway.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/loramesh-gateway/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

use crate::store::DEFAULT_HISTORY_CAP;

/// Errors that can occur when loading gateway configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct GatewayConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the gateway config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    live_bind_addr: Option<String>,
    history_cap: Option<usize>,
}

/// CLI arguments for the gateway.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "LoRa mesh reference gateway")]
pub struct GatewayCliArgs {
    /// Address serving the HTTP API.
    #[arg(short, long, env = "GATEWAY_ADDR")]
    pub bind: Option<String>,

    /// Address serving the live channel.
    #[arg(long, env = "GATEWAY_LIVE_ADDR")]
    pub live_bind: Option<String>,

    /// Path to config file (default: `~/.config/loramesh-gateway/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Records kept before the oldest are evicted.
    #[arg(long)]
    pub history_cap: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "GATEWAY_LOG")]
    pub log_level: String,
}

/// Fully resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address of the HTTP API (e.g. `0.0.0.0:5000`).
    pub bind_addr: String,
    /// Address of the live channel (e.g. `0.0.0.0:8000`). May equal
    /// `bind_addr`, in which case only one listener is started.
    pub live_bind_addr: String,
    /// Maximum number of records in the message log.
    pub history_cap: usize,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            live_bind_addr: "0.0.0.0:8000".to_string(),
            history_cap: DEFAULT_HISTORY_CAP,
            log_level: "info".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// An explicit `--config` that does not exist is an error; a missing
    /// default file is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &GatewayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &GatewayCliArgs, file: &GatewayConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            live_bind_addr: cli
                .live_bind
                .clone()
                .or_else(|| file.server.live_bind_addr.clone())
                .unwrap_or(defaults.live_bind_addr),
            history_cap: cli
                .history_cap
                .or(file.server.history_cap)
                .unwrap_or(defaults.history_cap),
            log_level: cli.log_level.clone(),
        }
    }

    /// Whether the live channel needs a listener of its own.
    #[must_use]
    pub fn separate_live_listener(&self) -> bool {
        self.live_bind_addr != self.bind_addr
    }
}

fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<GatewayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(GatewayConfigFile::default());
        };
        config_dir.join("loramesh-gateway").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(GatewayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
