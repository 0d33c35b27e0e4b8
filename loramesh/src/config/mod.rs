//! Configuration system for the `loramesh` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/loramesh/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::live::backoff::ReconnectPolicy;
use crate::live::live_url;
use crate::session::SessionConfig;

/// Errors that can occur when loading configuration.
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

    /// A configured URL is not usable.
    #[error("invalid {field} URL {value:?}: {source}")]
    InvalidUrl {
        /// Which setting.
        field: &'static str,
        /// The offending value.
        value: String,
        /// Parser error.
        source: url::ParseError,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    gateway: GatewayFileConfig,
    history: HistoryFileConfig,
    live: LiveFileConfig,
    peers: PeersFileConfig,
    session: SessionFileConfig,
}

/// `[gateway]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct GatewayFileConfig {
    origin: Option<String>,
    live_url: Option<String>,
    live_port: Option<u16>,
    live_path: Option<String>,
}

/// `[history]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HistoryFileConfig {
    page_size: Option<usize>,
}

/// `[live]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LiveFileConfig {
    connect_timeout_ms: Option<u64>,
    base_delay_ms: Option<u64>,
    growth: Option<f64>,
    max_delay_ms: Option<u64>,
}

/// `[peers]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PeersFileConfig {
    node_timeout_secs: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    channel_capacity: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Gateway --
    /// Origin of the gateway HTTP API.
    pub origin: String,
    /// Explicit live channel URL; derived from `origin` when unset.
    pub live_url: Option<String>,
    /// Port of the live channel when derived.
    pub live_port: u16,
    /// Path of the live channel when derived.
    pub live_path: String,

    // -- History --
    /// Records per history page.
    pub page_size: usize,

    // -- Live --
    /// Time allowed for a live connection to open.
    pub connect_timeout: Duration,
    /// First reconnect delay.
    pub base_delay: Duration,
    /// Growth factor between reconnect delays.
    pub growth: f64,
    /// Longest reconnect delay.
    pub max_delay: Duration,

    // -- Peers --
    /// Time after the last sighting at which a peer goes offline.
    pub node_timeout: Duration,

    // -- Session --
    /// Channel capacity for command/event mpsc channels.
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:5000".to_string(),
            live_url: None,
            live_port: 8000,
            live_path: "/ws".to_string(),
            page_size: 20,
            connect_timeout: Duration::from_millis(5000),
            base_delay: Duration::from_millis(1000),
            growth: 1.5,
            max_delay: Duration::from_millis(5000),
            node_timeout: Duration::from_secs(60),
            channel_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/loramesh/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            origin: cli
                .origin
                .clone()
                .or_else(|| file.gateway.origin.clone())
                .unwrap_or(defaults.origin),
            live_url: cli
                .live_url
                .clone()
                .or_else(|| file.gateway.live_url.clone()),
            live_port: file.gateway.live_port.unwrap_or(defaults.live_port),
            live_path: file
                .gateway
                .live_path
                .clone()
                .unwrap_or(defaults.live_path),
            page_size: file.history.page_size.unwrap_or(defaults.page_size),
            connect_timeout: file
                .live
                .connect_timeout_ms
                .map_or(defaults.connect_timeout, Duration::from_millis),
            base_delay: file
                .live
                .base_delay_ms
                .map_or(defaults.base_delay, Duration::from_millis),
            growth: file.live.growth.unwrap_or(defaults.growth),
            max_delay: file
                .live
                .max_delay_ms
                .map_or(defaults.max_delay, Duration::from_millis),
            node_timeout: file
                .peers
                .node_timeout_secs
                .map_or(defaults.node_timeout, Duration::from_secs),
            channel_capacity: file
                .session
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
        }
    }

    /// Parsed gateway origin.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if `origin` is not a URL.
    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.origin).map_err(|source| ConfigError::InvalidUrl {
            field: "origin",
            value: self.origin.clone(),
            source,
        })
    }

    /// The live channel URL: the explicit one, or one derived from `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if either URL is unusable.
    pub fn resolved_live_url(&self) -> Result<Url, ConfigError> {
        if let Some(explicit) = &self.live_url {
            return Url::parse(explicit).map_err(|source| ConfigError::InvalidUrl {
                field: "live",
                value: explicit.clone(),
                source,
            });
        }
        let origin = self.origin_url()?;
        live_url(&origin, self.live_port, &self.live_path).map_err(|source| {
            ConfigError::InvalidUrl {
                field: "origin",
                value: self.origin.clone(),
                source,
            }
        })
    }

    /// Build the [`SessionConfig`] for this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if the live URL cannot be built.
    pub fn to_session_config(&self) -> Result<SessionConfig, ConfigError> {
        Ok(SessionConfig {
            live_url: self.resolved_live_url()?,
            page_size: self.page_size,
            connect_timeout: self.connect_timeout,
            reconnect: ReconnectPolicy::new(self.base_delay, self.max_delay, self.growth),
            node_timeout: self.node_timeout,
            channel_capacity: self.channel_capacity,
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Live message stream client for LoRa mesh gateways")]
pub struct CliArgs {
    /// Origin of the gateway HTTP API (e.g. `http://127.0.0.1:5000`).
    #[arg(long, env = "LORAMESH_ORIGIN")]
    pub origin: Option<String>,

    /// Explicit live channel URL (default: derived from the origin).
    #[arg(long, env = "LORAMESH_LIVE_URL")]
    pub live_url: Option<String>,

    /// Path to config file (default: `~/.config/loramesh/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "LORAMESH_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/loramesh.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("loramesh").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
