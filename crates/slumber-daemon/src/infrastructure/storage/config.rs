//! TOML-based configuration for the daemon.
//!
//! Reads and writes [`AppConfig`] at the platform-appropriate path:
//! - Windows:  `%APPDATA%\Slumber\config.toml`
//! - Linux:    `~/.config/slumber/config.toml`
//! - macOS:    `~/Library/Application Support/Slumber/config.toml`
//!
//! Example file:
//!
//! ```toml
//! [listener]
//! port = 25565
//!
//! [status]
//! motd = "Server is asleep. Join to wake it up!"
//!
//! [server]
//! script = "/srv/minecraft/start.sh"
//! ```
//!
//! # Serde default values
//!
//! Every section is `#[serde(default)]` and every field has a
//! `#[serde(default = "...")]` function, so a missing file, a missing section
//! and a missing key all fall back to the same defaults.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use slumber_core::StatusResponse;
use thiserror::Error;

use crate::application::handle_connection::StatusResponder;
use crate::infrastructure::network::controller::{ControllerConfig, RetryPolicy, DEFAULT_PORT};
use crate::infrastructure::supervisor::{Interpreter, LaunchCommand};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but cannot be used.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub restart: RestartConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Where to listen and how long to give each client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenerConfig {
    /// IP address to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// The game server's port.  The daemon and the server take turns on it.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on one handshake/status exchange.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// How long to wait for the optional ping after a status response.
    #[serde(default = "default_ping_grace_ms")]
    pub ping_grace_ms: u64,
}

/// The server-list entry shown while the server sleeps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusConfig {
    #[serde(default = "default_motd")]
    pub motd: String,
    #[serde(default = "default_version_name")]
    pub version_name: String,
    /// Deliberately not a real protocol number so clients show it as incompatible.
    #[serde(default = "default_protocol")]
    pub protocol: i32,
    #[serde(default)]
    pub max_players: i32,
    #[serde(default)]
    pub online_players: i32,
}

/// How to start the real server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_script")]
    pub script: PathBuf,
    /// Shell used when the interpreter resolves to `shell`.
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub interpreter: Interpreter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// Backoff for re-acquiring the port after the server exits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RestartConfig {
    #[serde(default = "default_rebind_attempts")]
    pub rebind_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_connection_timeout_ms() -> u64 {
    5_000
}
fn default_ping_grace_ms() -> u64 {
    1_000
}
fn default_motd() -> String {
    "Server is sleeping. Join to wake it up!".to_string()
}
fn default_version_name() -> String {
    slumber_core::protocol::SLEEPING_VERSION_NAME.to_string()
}
fn default_protocol() -> i32 {
    slumber_core::protocol::SLEEPING_PROTOCOL
}
fn default_script() -> PathBuf {
    PathBuf::from("start.sh")
}
fn default_shell() -> String {
    "sh".to_string()
}
fn default_rebind_attempts() -> u32 {
    10
}
fn default_initial_backoff_ms() -> u64 {
    250
}
fn default_max_backoff_ms() -> u64 {
    4_000
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            connection_timeout_ms: default_connection_timeout_ms(),
            ping_grace_ms: default_ping_grace_ms(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            motd: default_motd(),
            version_name: default_version_name(),
            protocol: default_protocol(),
            max_players: 0,
            online_players: 0,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            script: default_script(),
            shell: default_shell(),
            interpreter: Interpreter::default(),
            working_dir: None,
        }
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            rebind_attempts: default_rebind_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

// ── Conversions into runtime types ────────────────────────────────────────────

impl AppConfig {
    /// Checks values that parse fine but cannot work at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_ip()?;
        if self.server.script.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("server.script must not be empty".into()));
        }
        if self.restart.rebind_attempts == 0 {
            return Err(ConfigError::Invalid(
                "restart.rebind_attempts must be at least 1".into(),
            ));
        }
        if self.restart.initial_backoff_ms > self.restart.max_backoff_ms {
            return Err(ConfigError::Invalid(format!(
                "restart.initial_backoff_ms ({}) exceeds restart.max_backoff_ms ({})",
                self.restart.initial_backoff_ms, self.restart.max_backoff_ms
            )));
        }
        Ok(())
    }

    fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.listener.bind_address.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "listener.bind_address `{}` is not an IP address",
                self.listener.bind_address
            ))
        })
    }

    /// Listener address and restart policy for the port controller.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `bind_address` is not an IP address.
    pub fn controller_config(&self) -> Result<ControllerConfig, ConfigError> {
        let addr = SocketAddr::new(self.bind_ip()?, self.listener.port);
        Ok(ControllerConfig {
            bind_addr: addr,
            connection_timeout: Duration::from_millis(self.listener.connection_timeout_ms),
            rebind: RetryPolicy {
                attempts: self.restart.rebind_attempts,
                initial_backoff: Duration::from_millis(self.restart.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.restart.max_backoff_ms),
            },
        })
    }

    /// The sleeping server-list entry and ping grace.
    pub fn status_responder(&self) -> StatusResponder {
        let status = StatusResponse {
            motd: self.status.motd.clone(),
            protocol_label: self.status.version_name.clone(),
            protocol: self.status.protocol,
            max_players: self.status.max_players,
            online_players: self.status.online_players,
        };
        StatusResponder::new(status, Duration::from_millis(self.listener.ping_grace_ms))
    }

    /// Command line that starts the real server.
    pub fn launch_command(&self) -> LaunchCommand {
        let cmd = LaunchCommand::for_script(
            &self.server.script,
            &self.server.shell,
            self.server.interpreter,
        );
        match &self.server.working_dir {
            Some(dir) => cmd.in_dir(dir),
            None => cmd,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Slumber"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("slumber"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("Slumber"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
