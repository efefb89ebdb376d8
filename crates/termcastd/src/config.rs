//! Daemon configuration: built-in defaults, optional TOML file, env overrides.
//!
//! Lookup order for each setting: environment variable, then the config file
//! (`$TERMCAST_CONFIG` or `<config_dir>/termcast/config.toml`), then the
//! built-in default.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::server::DEFAULT_SOCKET_PATH;

/// Runtime configuration for the daemon.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unix socket the server listens on.
    pub socket_path: PathBuf,

    /// Directory holding `<session_id>.json` records and `<session_id>.log` files.
    pub store_dir: PathBuf,

    /// Byte budget for each session's in-memory scrollback.
    pub scrollback_bytes: usize,

    /// PTY read buffer size.
    pub read_chunk_bytes: usize,

    /// Per-subscriber outbound buffer, in chunks. Overflow drops the oldest
    /// buffered chunks for that subscriber only.
    pub subscriber_buffer: usize,

    /// Inactivity window after which a running session is flagged stuck.
    pub stuck_after: Duration,

    /// Grace period between SIGTERM and SIGKILL on terminate.
    pub terminate_grace: Duration,

    /// How long terminal-state records stay listed before cleanup.
    pub retention: Duration,

    /// Lifecycle sweep interval.
    pub sweep_interval: Duration,

    /// Initial PTY window size.
    pub default_rows: u16,
    pub default_cols: u16,

    /// Default line count for `history` requests.
    pub history_lines: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            store_dir: state_dir().join("terminals"),
            scrollback_bytes: 1024 * 1024,
            read_chunk_bytes: 8 * 1024,
            subscriber_buffer: 256,
            stuck_after: Duration::from_secs(60),
            terminate_grace: Duration::from_secs(3),
            retention: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(1),
            default_rows: 24,
            default_cols: 80,
            history_lines: 1000,
        }
    }
}

/// Returns the termcast state directory (`~/.local/state/termcast` or `/tmp/termcast`).
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("termcast")
}

/// On-disk shape of the config file. Every field is optional; anything
/// missing falls back to the built-in default.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    socket_path: Option<PathBuf>,
    store_dir: Option<PathBuf>,
    scrollback_bytes: Option<usize>,
    read_chunk_bytes: Option<usize>,
    subscriber_buffer: Option<usize>,
    stuck_after_secs: Option<u64>,
    terminate_grace_secs: Option<u64>,
    retention_secs: Option<u64>,
    sweep_interval_ms: Option<u64>,
    default_rows: Option<u16>,
    default_cols: Option<u16>,
    history_lines: Option<usize>,
}

impl Config {
    /// Loads configuration: config file (if present) layered over defaults,
    /// then environment overrides (`TERMCAST_SOCKET`, `TERMCAST_STORE`).
    pub fn load() -> Self {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::from_toml_str(&contents) {
                    Ok(config) => config,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Invalid config file, using defaults");
                        Self::default()
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable config file, using defaults");
                    Self::default()
                }
            },
            _ => Self::default(),
        };

        if let Ok(socket) = env::var("TERMCAST_SOCKET") {
            config.socket_path = PathBuf::from(socket);
        }
        if let Ok(store) = env::var("TERMCAST_STORE") {
            config.store_dir = PathBuf::from(store);
        }

        config
    }

    /// Parses a TOML document into a config layered over the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        let raw: RawConfig = toml::from_str(contents)?;
        let defaults = Self::default();

        Ok(Self {
            socket_path: raw.socket_path.unwrap_or(defaults.socket_path),
            store_dir: raw.store_dir.unwrap_or(defaults.store_dir),
            scrollback_bytes: raw.scrollback_bytes.unwrap_or(defaults.scrollback_bytes),
            read_chunk_bytes: raw.read_chunk_bytes.unwrap_or(defaults.read_chunk_bytes),
            subscriber_buffer: raw.subscriber_buffer.unwrap_or(defaults.subscriber_buffer),
            stuck_after: raw
                .stuck_after_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.stuck_after),
            terminate_grace: raw
                .terminate_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.terminate_grace),
            retention: raw
                .retention_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention),
            sweep_interval: raw
                .sweep_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),
            default_rows: raw.default_rows.unwrap_or(defaults.default_rows),
            default_cols: raw.default_cols.unwrap_or(defaults.default_cols),
            history_lines: raw.history_lines.unwrap_or(defaults.history_lines),
        })
    }
}

/// Resolves the config file location (`$TERMCAST_CONFIG` wins).
fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("TERMCAST_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("termcast").join("config.toml"))
}
