//! Application master error types.

use gridcrawl_core::{ContainerId, StorageError};
use thiserror::Error;

/// Errors that can occur while negotiating and tracking containers.
#[derive(Debug, Error)]
pub enum MasterError {
    /// The input dataset is missing. Raised before any request is issued.
    #[error("input dataset not found: {0}")]
    InputNotFound(String),

    #[error("worker count must be at least 1, got {0}")]
    InvalidWorkerCount(u32),

    #[error("resource manager error: {0}")]
    ResourceManager(anyhow::Error),

    #[error("failed to launch container {container_id}: {reason}")]
    Launch {
        container_id: ContainerId,
        reason: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("negotiation cancelled before all containers completed")]
    Cancelled,
}

impl MasterError {
    /// Whether the job failed before any container was requested.
    pub fn is_fatal_before_negotiation(&self) -> bool {
        matches!(self, MasterError::InputNotFound(_))
    }
}

pub type MasterResult<T> = Result<T, MasterError>;
