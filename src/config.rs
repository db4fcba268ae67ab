//! Configuration module for the upcase-reactor server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::transform::TransformKind;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "upcase-reactor")]
#[command(author = "upcase-reactor authors")]
#[command(version = "0.1.0")]
#[command(about = "Echoes TCP byte streams back in uppercase", long_about = None)]
pub struct CliArgs {
    /// TCP port to listen on
    pub port: Option<u16>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Interface address to bind to (e.g., 127.0.0.1)
    #[arg(long)]
    pub host: Option<String>,

    /// Number of reactor threads, each with its own listener
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of live connections per reactor
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Byte transform applied to echoed data
    #[arg(long, value_enum)]
    pub transform: Option<TransformKind>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub buffers: BufferConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Listen backlog handed to `listen(2)`
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Upper bound on a single readiness wait
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Readiness events collected per wait
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
    #[serde(default)]
    pub transform: TransformKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            max_connections: default_max_connections(),
            backlog: default_backlog(),
            poll_timeout_ms: default_poll_timeout_ms(),
            events_capacity: default_events_capacity(),
            transform: TransformKind::default(),
        }
    }
}

/// Per-connection buffer configuration
#[derive(Debug, Deserialize)]
pub struct BufferConfig {
    /// Bytes requested from the socket per read call
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
    /// Pending output at which reading pauses
    #[serde(default = "default_high_watermark")]
    pub high_watermark: usize,
    /// Pending output at which reading resumes
    #[serde(default = "default_low_watermark")]
    pub low_watermark: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            read_chunk: default_read_chunk(),
            high_watermark: default_high_watermark(),
            low_watermark: default_low_watermark(),
        }
    }
}

/// Shutdown configuration
#[derive(Debug, Deserialize)]
pub struct ShutdownConfig {
    /// How long pending output may drain before connections are force-closed
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Connection lifecycle configuration
#[derive(Debug, Deserialize, Default)]
pub struct ConnectionConfig {
    /// Close connections idle for this many seconds (0 = never)
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    1
}

fn default_max_connections() -> usize {
    10_000
}

fn default_backlog() -> i32 {
    1024
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_events_capacity() -> usize {
    1024
}

fn default_read_chunk() -> usize {
    16 * 1024
}

fn default_high_watermark() -> usize {
    4 * 1024 * 1024
}

fn default_low_watermark() -> usize {
    1024 * 1024
}

fn default_drain_timeout_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub max_connections: usize,
    pub backlog: i32,
    pub poll_timeout: Duration,
    pub events_capacity: usize,
    pub read_chunk: usize,
    pub high_watermark: usize,
    pub low_watermark: usize,
    pub drain_timeout: Duration,
    /// `None` disables idle eviction.
    pub idle_timeout: Option<Duration>,
    pub transform: TransformKind,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::parse_from(["upcase-reactor"]), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let TomlConfig {
            server,
            buffers,
            shutdown,
            connection,
            logging,
        } = toml_config;

        Config {
            host: cli.host.unwrap_or(server.host),
            port: cli.port.unwrap_or(server.port),
            workers: cli.workers.unwrap_or(server.workers),
            max_connections: cli.max_connections.unwrap_or(server.max_connections),
            backlog: server.backlog,
            poll_timeout: Duration::from_millis(server.poll_timeout_ms),
            events_capacity: server.events_capacity,
            read_chunk: buffers.read_chunk,
            high_watermark: buffers.high_watermark,
            low_watermark: buffers.low_watermark,
            drain_timeout: Duration::from_millis(shutdown.drain_timeout_ms),
            idle_timeout: (connection.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(connection.idle_timeout_secs)),
            transform: cli.transform.unwrap_or(server.transform),
            log_level: cli.log_level.unwrap_or(logging.level),
        }
    }

    /// Reject settings the reactor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.events_capacity == 0 {
            return Err(ConfigError::Invalid(
                "events_capacity must be greater than 0".into(),
            ));
        }
        if self.read_chunk == 0 {
            return Err(ConfigError::Invalid("read_chunk must be greater than 0".into()));
        }
        if self.low_watermark >= self.high_watermark {
            return Err(ConfigError::Invalid(format!(
                "low_watermark ({}) must be below high_watermark ({})",
                self.low_watermark, self.high_watermark
            )));
        }
        Ok(())
    }

    /// Address string the listener binds to.
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
