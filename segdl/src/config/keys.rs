//! Addressable configuration keys (`section.key`).

use std::fmt;
use std::str::FromStr;

use super::size::{format_size, parse_size};
use super::{expand_tilde, ConfigError, ConfigFile};
use crate::checksum::DigestAlgorithm;

/// Every setting `config get|set|list` can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    DownloadsDirectory,
    DownloadsMaxActive,
    DownloadsQueueCapacity,

    SegmentsMaxPerTransfer,
    SegmentsMinSize,
    SegmentsDefaultCount,
    SegmentsMaxAttempts,
    SegmentsRetryDelayMs,
    SegmentsStallTimeoutSecs,
    SegmentsBufferSize,

    NetworkConnectTimeoutSecs,
    NetworkUserAgent,

    IntegrityAlgorithm,
    IntegrityStrict,
    IntegritySegmentDigests,

    LoggingLevel,
    LoggingDirectory,

    StorageStateFile,
}

const ALL_KEYS: &[ConfigKey] = &[
    ConfigKey::DownloadsDirectory,
    ConfigKey::DownloadsMaxActive,
    ConfigKey::DownloadsQueueCapacity,
    ConfigKey::SegmentsMaxPerTransfer,
    ConfigKey::SegmentsMinSize,
    ConfigKey::SegmentsDefaultCount,
    ConfigKey::SegmentsMaxAttempts,
    ConfigKey::SegmentsRetryDelayMs,
    ConfigKey::SegmentsStallTimeoutSecs,
    ConfigKey::SegmentsBufferSize,
    ConfigKey::NetworkConnectTimeoutSecs,
    ConfigKey::NetworkUserAgent,
    ConfigKey::IntegrityAlgorithm,
    ConfigKey::IntegrityStrict,
    ConfigKey::IntegritySegmentDigests,
    ConfigKey::LoggingLevel,
    ConfigKey::LoggingDirectory,
    ConfigKey::StorageStateFile,
];

impl ConfigKey {
    /// All keys in file order.
    pub fn all() -> &'static [ConfigKey] {
        ALL_KEYS
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    pub fn section(&self) -> &'static str {
        use ConfigKey::*;
        match self {
            DownloadsDirectory | DownloadsMaxActive | DownloadsQueueCapacity => "downloads",
            SegmentsMaxPerTransfer
            | SegmentsMinSize
            | SegmentsDefaultCount
            | SegmentsMaxAttempts
            | SegmentsRetryDelayMs
            | SegmentsStallTimeoutSecs
            | SegmentsBufferSize => "segments",
            NetworkConnectTimeoutSecs | NetworkUserAgent => "network",
            IntegrityAlgorithm | IntegrityStrict | IntegritySegmentDigests => "integrity",
            LoggingLevel | LoggingDirectory => "logging",
            StorageStateFile => "storage",
        }
    }

    pub fn key_name(&self) -> &'static str {
        use ConfigKey::*;
        match self {
            DownloadsDirectory => "directory",
            DownloadsMaxActive => "max_active",
            DownloadsQueueCapacity => "queue_capacity",
            SegmentsMaxPerTransfer => "max_per_transfer",
            SegmentsMinSize => "min_size",
            SegmentsDefaultCount => "default_count",
            SegmentsMaxAttempts => "max_attempts",
            SegmentsRetryDelayMs => "retry_delay_ms",
            SegmentsStallTimeoutSecs => "stall_timeout_secs",
            SegmentsBufferSize => "buffer_size",
            NetworkConnectTimeoutSecs => "connect_timeout_secs",
            NetworkUserAgent => "user_agent",
            IntegrityAlgorithm => "algorithm",
            IntegrityStrict => "strict",
            IntegritySegmentDigests => "segment_digests",
            LoggingLevel => "level",
            LoggingDirectory => "directory",
            StorageStateFile => "state_file",
        }
    }

    /// Current value as written to the file; empty when unset.
    pub fn get(&self, config: &ConfigFile) -> String {
        use ConfigKey::*;
        let path = |p: &Option<std::path::PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };
        match self {
            DownloadsDirectory => path(&config.downloads.directory),
            DownloadsMaxActive => config.downloads.max_active.to_string(),
            DownloadsQueueCapacity => config.downloads.queue_capacity.to_string(),
            SegmentsMaxPerTransfer => config.segments.max_per_transfer.to_string(),
            SegmentsMinSize => format_size(config.segments.min_size),
            SegmentsDefaultCount => config.segments.default_count.to_string(),
            SegmentsMaxAttempts => config.segments.max_attempts.to_string(),
            SegmentsRetryDelayMs => config.segments.retry_delay_ms.to_string(),
            SegmentsStallTimeoutSecs => config.segments.stall_timeout_secs.to_string(),
            SegmentsBufferSize => format_size(config.segments.buffer_size as u64),
            NetworkConnectTimeoutSecs => config.network.connect_timeout_secs.to_string(),
            NetworkUserAgent => config.network.user_agent.clone().unwrap_or_default(),
            IntegrityAlgorithm => config.integrity.algorithm.as_str().to_string(),
            IntegrityStrict => config.integrity.strict.to_string(),
            IntegritySegmentDigests => config.integrity.segment_digests.to_string(),
            LoggingLevel => config.logging.level.clone(),
            LoggingDirectory => path(&config.logging.directory),
            StorageStateFile => path(&config.storage.state_file),
        }
    }

    /// Parses `value` and stores it. An empty value clears optional keys.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        use ConfigKey::*;
        let value = value.trim();
        let optional_path = || (!value.is_empty()).then(|| expand_tilde(value));

        match self {
            DownloadsDirectory => config.downloads.directory = optional_path(),
            DownloadsMaxActive => config.downloads.max_active = self.positive(value)?,
            DownloadsQueueCapacity => config.downloads.queue_capacity = self.number(value)?,
            SegmentsMaxPerTransfer => config.segments.max_per_transfer = self.positive(value)?,
            SegmentsMinSize => config.segments.min_size = self.size(value)?,
            SegmentsDefaultCount => config.segments.default_count = self.positive(value)?,
            SegmentsMaxAttempts => config.segments.max_attempts = self.positive(value)?,
            SegmentsRetryDelayMs => config.segments.retry_delay_ms = self.number(value)?,
            SegmentsStallTimeoutSecs => {
                config.segments.stall_timeout_secs = self.positive(value)?
            }
            SegmentsBufferSize => config.segments.buffer_size = self.size(value)? as usize,
            NetworkConnectTimeoutSecs => {
                config.network.connect_timeout_secs = self.positive(value)?
            }
            NetworkUserAgent => {
                config.network.user_agent = (!value.is_empty()).then(|| value.to_string())
            }
            IntegrityAlgorithm => {
                config.integrity.algorithm = value
                    .parse::<DigestAlgorithm>()
                    .map_err(|e| self.invalid(value, e.to_string()))?
            }
            IntegrityStrict => config.integrity.strict = self.boolean(value)?,
            IntegritySegmentDigests => config.integrity.segment_digests = self.boolean(value)?,
            LoggingLevel => {
                if value.is_empty() {
                    return Err(self.invalid(value, "level must not be empty"));
                }
                config.logging.level = value.to_string();
            }
            LoggingDirectory => config.logging.directory = optional_path(),
            StorageStateFile => config.storage.state_file = optional_path(),
        }
        Ok(())
    }

    fn invalid(&self, value: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            key: self.name(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn number<T: FromStr>(&self, value: &str) -> Result<T, ConfigError> {
        value
            .parse()
            .map_err(|_| self.invalid(value, "expected a non-negative integer"))
    }

    fn positive<T: FromStr + PartialOrd + Default>(&self, value: &str) -> Result<T, ConfigError> {
        let n: T = self.number(value)?;
        if n <= T::default() {
            return Err(self.invalid(value, "must be at least 1"));
        }
        Ok(n)
    }

    fn size(&self, value: &str) -> Result<u64, ConfigError> {
        match parse_size(value) {
            Ok(0) => Err(self.invalid(value, "must be at least 1 byte")),
            Ok(n) => Ok(n),
            Err(_) => Err(self.invalid(value, "expected a size such as 1048576, 512KB or 1MB")),
        }
    }

    fn boolean(&self, value: &str) -> Result<bool, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(self.invalid(value, "expected true or false")),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section(), self.key_name())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ConfigKey::all()
            .iter()
            .copied()
            .find(|k| k.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    #[test]
    fn test_names_unique_and_parse_back() {
        let names: HashSet<String> = ConfigKey::all().iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), ConfigKey::all().len());

        for key in ConfigKey::all() {
            assert_eq!(key.name().parse::<ConfigKey>().unwrap(), *key);
        }
        assert!("downloads.nope".parse::<ConfigKey>().is_err());
    }

    #[test]
    fn test_set_and_get() {
        let mut config = ConfigFile::default();

        ConfigKey::SegmentsMinSize.set(&mut config, "2MB").unwrap();
        assert_eq!(config.segments.min_size, 2 * 1024 * 1024);
        assert_eq!(ConfigKey::SegmentsMinSize.get(&config), "2MB");

        ConfigKey::IntegrityStrict.set(&mut config, "yes").unwrap();
        assert!(config.integrity.strict);

        ConfigKey::IntegrityAlgorithm.set(&mut config, "SHA-512").unwrap();
        assert_eq!(ConfigKey::IntegrityAlgorithm.get(&config), "sha512");

        ConfigKey::StorageStateFile.set(&mut config, "/var/segdl/state.json").unwrap();
        assert_eq!(
            config.storage.state_file,
            Some(PathBuf::from("/var/segdl/state.json"))
        );
        ConfigKey::StorageStateFile.set(&mut config, "").unwrap();
        assert_eq!(config.storage.state_file, None);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = ConfigFile::default();
        assert!(ConfigKey::DownloadsMaxActive.set(&mut config, "0").is_err());
        assert!(ConfigKey::DownloadsMaxActive.set(&mut config, "-3").is_err());
        assert!(ConfigKey::IntegrityStrict.set(&mut config, "maybe").is_err());
        assert!(ConfigKey::SegmentsMinSize.set(&mut config, "0").is_err());
        assert!(ConfigKey::IntegrityAlgorithm.set(&mut config, "md5").is_err());

        // Zero is fine where it means "no delay" or "no queue".
        ConfigKey::SegmentsRetryDelayMs.set(&mut config, "0").unwrap();
        ConfigKey::DownloadsQueueCapacity.set(&mut config, "0").unwrap();
    }
}
