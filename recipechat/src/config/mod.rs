//! Configuration system for the `recipechat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/recipechat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use recipechat_proto::proxy::{DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT};

use crate::address::{
    self, AddressError, DEFAULT_API_BASE, DEFAULT_PROXY_PATH, DEFAULT_WS_PATH,
};
use crate::transport::backoff::ReconnectConfig;
use crate::transport::fallback::FallbackOptions;
use crate::transport::socket::SocketOptions;

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
}

/// Which transport strategy the client runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Persistent WebSocket to the chat server.
    Socket,
    /// One HTTP request per message to the AI proxy.
    #[default]
    Fallback,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    auth: AuthFileConfig,
    transport: TransportFileConfig,
    reconnect: ReconnectFileConfig,
    fallback: FallbackFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    api_base_url: Option<String>,
    ws_base_url: Option<String>,
    ws_path: Option<String>,
    page_origin: Option<String>,
    proxy_url: Option<String>,
}

/// `[auth]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct AuthFileConfig {
    token: Option<String>,
}

/// `[transport]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TransportFileConfig {
    mode: Option<TransportMode>,
    connect_timeout_secs: Option<u64>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
}

/// `[fallback]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct FallbackFileConfig {
    model: Option<String>,
    system: Option<String>,
    request_timeout_secs: Option<u64>,
    /// `0` disables the revert to `open` after a failure.
    error_recovery_ms: Option<u64>,
    chunk_chars: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// HTTP API base, absolute or same-origin relative.
    pub api_base_url: String,
    /// WebSocket base. When absent the socket URL is derived from the origin.
    pub ws_base_url: Option<String>,
    /// Path of the chat socket below the base.
    pub ws_path: String,
    /// Origin relative addresses are resolved against (the web page origin
    /// in a browser deployment).
    pub page_origin: Option<String>,
    /// AI proxy endpoint, absolute or relative.
    pub proxy_url: String,

    // -- Auth --
    /// Token sent as `?token=` (socket) or bearer header (fallback).
    pub token: Option<String>,

    // -- Transport --
    /// Strategy to run.
    pub mode: TransportMode,
    /// Bound on the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Reconnect policy of the socket transport.
    pub reconnect: ReconnectConfig,

    // -- Fallback --
    /// Default model for proxy requests.
    pub model: String,
    /// Default system prompt for proxy requests.
    pub system: String,
    /// Bound on one proxy round trip.
    pub request_timeout: Duration,
    /// Delay before reverting from `error` to `open`; `None` disables it.
    pub error_recovery: Option<Duration>,
    /// Replay proxy answers as deltas of this many characters.
    pub chunk_chars: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            ws_base_url: None,
            ws_path: DEFAULT_WS_PATH.to_string(),
            page_origin: None,
            proxy_url: DEFAULT_PROXY_PATH.to_string(),
            token: None,
            mode: TransportMode::default(),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            model: DEFAULT_MODEL.to_string(),
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            request_timeout: Duration::from_secs(60),
            error_recovery: Some(Duration::from_millis(500)),
            chunk_chars: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path (`~/.config/recipechat/config.toml`) is
    /// tried and silently ignored if missing.
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
        let reconnect = ReconnectConfig {
            initial_delay: file
                .reconnect
                .initial_delay_ms
                .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
            max_delay: file
                .reconnect
                .max_delay_ms
                .map_or(defaults.reconnect.max_delay, Duration::from_millis),
            max_attempts: file.reconnect.max_attempts.or(defaults.reconnect.max_attempts),
        };

        Self {
            api_base_url: cli
                .api_base_url
                .clone()
                .or_else(|| file.server.api_base_url.clone())
                .unwrap_or(defaults.api_base_url),
            ws_base_url: cli
                .ws_base_url
                .clone()
                .or_else(|| file.server.ws_base_url.clone()),
            ws_path: file.server.ws_path.clone().unwrap_or(defaults.ws_path),
            page_origin: cli
                .origin
                .clone()
                .or_else(|| file.server.page_origin.clone()),
            proxy_url: cli
                .proxy_url
                .clone()
                .or_else(|| file.server.proxy_url.clone())
                .unwrap_or(defaults.proxy_url),
            token: cli.token.clone().or_else(|| file.auth.token.clone()),
            mode: cli
                .mode
                .or(file.transport.mode)
                .unwrap_or(defaults.mode),
            connect_timeout: file
                .transport
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            reconnect,
            model: file.fallback.model.clone().unwrap_or(defaults.model),
            system: file.fallback.system.clone().unwrap_or(defaults.system),
            request_timeout: file
                .fallback
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            error_recovery: match file.fallback.error_recovery_ms {
                Some(0) => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => defaults.error_recovery,
            },
            chunk_chars: file.fallback.chunk_chars.filter(|n| *n > 0),
        }
    }

    fn origin(&self) -> Result<Option<Url>, AddressError> {
        self.page_origin
            .as_deref()
            .map(|o| {
                Url::parse(o).map_err(|source| AddressError::Parse {
                    url: o.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// The WebSocket endpoint, token included.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] if the address cannot be resolved.
    pub fn socket_endpoint(&self) -> Result<Url, AddressError> {
        let origin = self.origin()?;
        address::resolve_socket_url(
            self.ws_base_url.as_deref(),
            origin.as_ref(),
            &self.ws_path,
            self.token.as_deref(),
        )
    }

    /// The AI proxy endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] if the address cannot be resolved.
    pub fn proxy_endpoint(&self) -> Result<Url, AddressError> {
        let origin = self.origin()?;
        address::resolve_proxy_url(&self.proxy_url, &self.api_base_url, origin.as_ref())
    }

    /// Socket transport tunables.
    #[must_use]
    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            connect_timeout: self.connect_timeout,
            reconnect: self.reconnect.clone(),
            ..SocketOptions::default()
        }
    }

    /// Fallback transport tunables.
    #[must_use]
    pub fn fallback_options(&self) -> FallbackOptions {
        FallbackOptions {
            model: self.model.clone(),
            system: self.system.clone(),
            request_timeout: self.request_timeout,
            error_recovery: self.error_recovery,
            chunk_chars: self.chunk_chars,
            token: self.token.clone(),
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Terminal chat with the recipe cooking assistant")]
pub struct CliArgs {
    /// HTTP API base URL.
    #[arg(long, env = "RECIPECHAT_API_BASE_URL")]
    pub api_base_url: Option<String>,

    /// WebSocket base URL (e.g. `ws://localhost:8000`).
    #[arg(long, env = "RECIPECHAT_WS_BASE_URL")]
    pub ws_base_url: Option<String>,

    /// AI proxy endpoint, absolute or relative to the API base.
    #[arg(long, env = "RECIPECHAT_PROXY_URL")]
    pub proxy_url: Option<String>,

    /// Origin relative addresses are resolved against.
    #[arg(long)]
    pub origin: Option<String>,

    /// Authentication token.
    #[arg(long, env = "RECIPECHAT_TOKEN")]
    pub token: Option<String>,

    /// Transport strategy.
    #[arg(long, value_enum)]
    pub mode: Option<TransportMode>,

    /// Path to config file (default: `~/.config/recipechat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "RECIPECHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/recipechat.log`).
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
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("recipechat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
