//! Configuration for the `streakboard` binary.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/streakboard/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::sync::{DEFAULT_FEED_IDLE_TIMEOUT, DEFAULT_OP_TIMEOUT, DEFAULT_POLL_INTERVAL, SyncConfig};

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

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    session: SessionFileConfig,
    sync: SyncFileConfig,
    store: StoreFileConfig,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    user_id: Option<String>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    op_timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    feed_idle_timeout_ms: Option<u64>,
    feed_buffer: Option<usize>,
}

/// `[store]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StoreFileConfig {
    latency_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User whose task list the session owns.
    pub user_id: String,
    /// Bound on each store call.
    pub op_timeout: Duration,
    /// Interval between refreshes while the change feed is down.
    pub poll_interval: Duration,
    /// Silence after which a change-feed subscription is presumed dead.
    pub feed_idle_timeout: Duration,
    /// Frames buffered per change-feed subscription.
    pub feed_buffer: usize,
    /// Artificial latency added to every in-memory store call.
    pub store_latency: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_id: "demo-user".to_string(),
            op_timeout: DEFAULT_OP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            feed_idle_timeout: DEFAULT_FEED_IDLE_TIMEOUT,
            feed_buffer: 64,
            store_latency: Duration::ZERO,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if the default file exists but is malformed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            user_id: cli
                .user_id
                .clone()
                .or_else(|| file.session.user_id.clone())
                .unwrap_or(defaults.user_id),
            op_timeout: cli
                .op_timeout_ms
                .or(file.sync.op_timeout_ms)
                .map_or(defaults.op_timeout, Duration::from_millis),
            poll_interval: cli
                .poll_interval_ms
                .or(file.sync.poll_interval_ms)
                .map_or(defaults.poll_interval, Duration::from_millis),
            feed_idle_timeout: cli
                .feed_idle_timeout_ms
                .or(file.sync.feed_idle_timeout_ms)
                .map_or(defaults.feed_idle_timeout, Duration::from_millis),
            feed_buffer: file.sync.feed_buffer.unwrap_or(defaults.feed_buffer),
            store_latency: file
                .store
                .latency_ms
                .map_or(defaults.store_latency, Duration::from_millis),
        }
    }

    /// Timing settings for the synchronizer and its delivery loop.
    #[must_use]
    pub const fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            op_timeout: self.op_timeout,
            poll_interval: self.poll_interval,
            feed_idle_timeout: self.feed_idle_timeout,
        }
    }
}

/// Subcommands of the binary.
#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Compute a streak from RFC 3339 completion instants.
    Streak {
        /// Reference instant (default: now).
        #[arg(long)]
        now: Option<String>,
        /// Completion instants.
        instants: Vec<String>,
    },
    /// Run a scripted session against the in-memory store.
    Demo,
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Optimistic task list with daily completion streaks")]
pub struct CliArgs {
    /// User whose task list to open.
    #[arg(long, env = "STREAKBOARD_USER")]
    pub user_id: Option<String>,

    /// Store call timeout in milliseconds.
    #[arg(long)]
    pub op_timeout_ms: Option<u64>,

    /// Poll interval in milliseconds while the change feed is down.
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Milliseconds without a change-feed frame before falling back to
    /// polling.
    #[arg(long)]
    pub feed_idle_timeout_ms: Option<u64>,

    /// Path to config file (default: `~/.config/streakboard/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "STREAKBOARD_LOG")]
    pub log_level: String,

    /// Path to log file (default: stderr).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// What to run (default: `demo`).
    #[command(subcommand)]
    pub command: Option<Command>,
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
        config_dir.join("streakboard").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
