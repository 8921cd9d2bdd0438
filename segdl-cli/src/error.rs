//! CLI error type.

use std::fmt;

use segdl::config::ConfigError;
use segdl::logging::LoggingError;
use segdl::model::InvalidTransition;
use segdl::orchestrator::OrchestratorError;
use segdl::storage::StorageError;
use segdl::transport::TransportError;

/// Errors surfaced to the user with a non-zero exit code.
#[derive(Debug)]
pub enum CliError {
    Config(String),
    Logging(LoggingError),
    Storage(StorageError),
    Orchestrator(OrchestratorError),
    Transport(TransportError),
    Io(std::io::Error),
    /// No transfer matches the given id or prefix.
    NotFound(String),
    /// One or more transfers ended in `Failed`.
    TransferFailed { failed: usize },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(e) => write!(f, "Failed to initialise logging: {}", e),
            CliError::Storage(e) => write!(f, "State file error: {}", e),
            CliError::Orchestrator(e) => write!(f, "{}", e),
            CliError::Transport(e) => write!(f, "Network error: {}", e),
            CliError::Io(e) => write!(f, "I/O error: {}", e),
            CliError::NotFound(id) => write!(
                f,
                "No transfer matches '{}'. Use 'segdl list' to see transfers.",
                id
            ),
            CliError::TransferFailed { failed } if *failed == 1 => {
                write!(f, "1 transfer failed")
            }
            CliError::TransferFailed { failed } => write!(f, "{} transfers failed", failed),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Logging(e) => Some(e),
            CliError::Storage(e) => Some(e),
            CliError::Orchestrator(e) => Some(e),
            CliError::Transport(e) => Some(e),
            CliError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        CliError::Storage(e)
    }
}

impl From<OrchestratorError> for CliError {
    fn from(e: OrchestratorError) -> Self {
        CliError::Orchestrator(e)
    }
}

impl From<InvalidTransition> for CliError {
    fn from(e: InvalidTransition) -> Self {
        CliError::Orchestrator(OrchestratorError::InvalidTransition(e))
    }
}

impl From<TransportError> for CliError {
    fn from(e: TransportError) -> Self {
        CliError::Transport(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}
