//! User configuration stored in `config.ini`.
//!
//! The file lives in the platform config directory
//! (`~/.config/segdl/config.ini` on Linux). A missing file yields defaults;
//! unknown sections and keys are ignored so older binaries can read newer
//! files.
//!
//! ```ini
//! [downloads]
//! directory = ~/Downloads
//! max_active = 10
//! queue_capacity = 100
//!
//! [segments]
//! max_per_transfer = 32
//! min_size = 1MB
//! default_count = 8
//! max_attempts = 3
//! retry_delay_ms = 1000
//! stall_timeout_secs = 60
//! buffer_size = 64KB
//!
//! [network]
//! connect_timeout_secs = 30
//! user_agent = segdl/0.3.0
//!
//! [integrity]
//! algorithm = sha256
//! strict = false
//! segment_digests = false
//!
//! [logging]
//! level = info
//! directory = ~/.local/share/segdl/logs
//!
//! [storage]
//! state_file = ~/.local/share/segdl/state.json
//! ```

mod file;
mod keys;
mod size;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use file::{
    ConfigFile, DownloadsSettings, IntegritySettings, LoggingSettings, NetworkSettings,
    SegmentSettings, StorageSettings,
};
pub use keys::ConfigKey;
pub use size::{format_size, human_size, parse_size};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(String),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
}

/// Directory holding `config.ini`.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("segdl")
}

/// Path of `config.ini`.
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.ini")
}

/// Directory for state and logs.
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("segdl")
}

/// Expands a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~") {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        _ => PathBuf::from(path),
    }
}
