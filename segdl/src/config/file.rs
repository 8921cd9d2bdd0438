//! Typed view of `config.ini`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;

use super::keys::ConfigKey;
use super::{config_file_path, data_dir, ConfigError};
use crate::checksum::DigestAlgorithm;
use crate::engine::{
    EngineConfig, DEFAULT_BUFFER_SIZE, DEFAULT_RETRY_DELAY_MS, DEFAULT_STALL_TIMEOUT_SECS,
};
use crate::logging::{LoggingConfig, DEFAULT_LOG_LEVEL};
use crate::model::{DEFAULT_MAX_ATTEMPTS, DEFAULT_SEGMENT_HINT};
use crate::orchestrator::{OrchestratorConfig, DEFAULT_MAX_ACTIVE, DEFAULT_QUEUE_CAPACITY};
use crate::planner::{SegmentPlanner, DEFAULT_MAX_SEGMENTS, DEFAULT_MIN_SEGMENT_SIZE};
use crate::transport::{TransportConfig, DEFAULT_CONNECT_TIMEOUT_SECS};

/// `[downloads]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadsSettings {
    /// Where downloads land when no output path is given.
    pub directory: Option<PathBuf>,
    pub max_active: usize,
    pub queue_capacity: usize,
}

/// `[segments]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSettings {
    pub max_per_transfer: usize,
    pub min_size: u64,
    /// Segment count requested when the user does not choose one.
    pub default_count: usize,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub stall_timeout_secs: u64,
    pub buffer_size: usize,
}

/// `[network]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    pub connect_timeout_secs: u64,
    pub user_agent: Option<String>,
}

/// `[integrity]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegritySettings {
    pub algorithm: DigestAlgorithm,
    pub strict: bool,
    pub segment_digests: bool,
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
    pub directory: Option<PathBuf>,
}

/// `[storage]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub state_file: Option<PathBuf>,
}

/// All settings, defaults filled in for anything the file leaves out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub downloads: DownloadsSettings,
    pub segments: SegmentSettings,
    pub network: NetworkSettings,
    pub integrity: IntegritySettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            downloads: DownloadsSettings {
                directory: None,
                max_active: DEFAULT_MAX_ACTIVE,
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
            },
            segments: SegmentSettings {
                max_per_transfer: DEFAULT_MAX_SEGMENTS,
                min_size: DEFAULT_MIN_SEGMENT_SIZE,
                default_count: DEFAULT_SEGMENT_HINT,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
                stall_timeout_secs: DEFAULT_STALL_TIMEOUT_SECS,
                buffer_size: DEFAULT_BUFFER_SIZE,
            },
            network: NetworkSettings {
                connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
                user_agent: None,
            },
            integrity: IntegritySettings {
                algorithm: DigestAlgorithm::default(),
                strict: false,
                segment_digests: false,
            },
            logging: LoggingSettings {
                level: DEFAULT_LOG_LEVEL.to_string(),
                directory: None,
            },
            storage: StorageSettings { state_file: None },
        }
    }
}

impl ConfigFile {
    /// Loads `config.ini` from the platform config directory.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Loads from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses INI text. Unknown keys are ignored.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut config = Self::default();

        for key in ConfigKey::all() {
            if let Some(value) = ini.get_from(Some(key.section()), key.key_name()) {
                if value.trim().is_empty() {
                    continue;
                }
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    /// Writes to the platform config path, creating its directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        self.to_ini().write_to_file(path)?;
        Ok(())
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            let value = key.get(self);
            if !value.is_empty() {
                ini.with_section(Some(key.section()))
                    .set(key.key_name(), value);
            }
        }
        ini
    }

    // =========================================================================
    // Runtime configs
    // =========================================================================

    pub fn engine_config(&self) -> EngineConfig {
        let s = &self.segments;
        EngineConfig::default()
            .with_max_segments(s.max_per_transfer)
            .with_min_segment_size(s.min_size)
            .with_retry_delay(Duration::from_millis(s.retry_delay_ms))
            .with_stall_timeout(Duration::from_secs(s.stall_timeout_secs.max(1)))
            .with_buffer_size(s.buffer_size)
            .with_segment_digests(self.integrity.segment_digests)
            .with_strict_integrity(self.integrity.strict)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_max_active(self.downloads.max_active)
            .with_queue_capacity(self.downloads.queue_capacity)
            .with_engine(self.engine_config())
    }

    /// Planner as engines would apply it for a transfer asking for the
    /// configured default segment count.
    pub fn planner(&self) -> SegmentPlanner {
        self.engine_config().planner(self.segments.default_count)
    }

    pub fn transport_config(&self) -> TransportConfig {
        let config = TransportConfig::default()
            .with_connect_timeout(Duration::from_secs(self.network.connect_timeout_secs));
        match &self.network.user_agent {
            Some(agent) => config.with_user_agent(agent.clone()),
            None => config,
        }
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::default()
            .with_level(self.logging.level.clone())
            .with_directory(self.log_dir())
    }

    /// Configured download directory, else the platform one, else `.`.
    pub fn download_dir(&self) -> PathBuf {
        self.downloads
            .directory
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn state_file(&self) -> PathBuf {
        self.storage
            .state_file
            .clone()
            .unwrap_or_else(|| data_dir().join("state.json"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.logging
            .directory
            .clone()
            .unwrap_or_else(|| data_dir().join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&dir.path().join("absent.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_parse_sections() {
        let config = ConfigFile::parse(
            r#"
[downloads]
directory = /data/incoming
max_active = 4

[segments]
min_size = 512KB
max_per_transfer = 16

[integrity]
algorithm = sha512
strict = true

[unknown]
whatever = 1
"#,
        )
        .unwrap();

        assert_eq!(config.downloads.directory, Some(PathBuf::from("/data/incoming")));
        assert_eq!(config.downloads.max_active, 4);
        assert_eq!(config.downloads.queue_capacity, 100);
        assert_eq!(config.segments.min_size, 512 * 1024);
        assert_eq!(config.segments.max_per_transfer, 16);
        assert_eq!(config.integrity.algorithm, DigestAlgorithm::Sha512);
        assert!(config.integrity.strict);
    }

    #[test]
    fn test_invalid_value_reported() {
        let err = ConfigFile::parse("[downloads]\nmax_active = lots\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.ini");

        let mut config = ConfigFile::default();
        config.segments.min_size = 4 * 1024 * 1024;
        config.network.user_agent = Some("custom/1.0".to_string());
        config.storage.state_file = Some(dir.path().join("state.json"));
        config.save_to(&path).unwrap();

        assert_eq!(ConfigFile::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_runtime_conversions() {
        let mut config = ConfigFile::default();
        config.downloads.max_active = 3;
        config.segments.max_per_transfer = 4;
        config.segments.min_size = 1000;
        config.integrity.strict = true;

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.max_active, 3);
        assert_eq!(orchestrator.engine.max_segments, 4);
        assert!(orchestrator.engine.strict_integrity);

        let ranges = config.planner().plan(Some(10_000));
        assert_eq!(ranges.len(), 4);

        assert!(config.transport_config().user_agent.starts_with("segdl/"));
    }
}
