//! Orchestrator error types.

use thiserror::Error;

use crate::engine::EngineError;
use crate::model::{InvalidTransition, TransferId};
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("transfer {0} not found")]
    NotFound(TransferId),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("queue is full ({capacity} transfers waiting), transfer {id} rejected")]
    QueueFull { id: TransferId, capacity: usize },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Engine(EngineError),

    #[error("orchestrator is shutting down")]
    ShuttingDown,
}

impl From<EngineError> for OrchestratorError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidTransition(t) => Self::InvalidTransition(t),
            EngineError::Storage(s) => Self::Storage(s),
            other => Self::Engine(other),
        }
    }
}
