//! Storage-layer capability.
//!
//! The coordinator only needs existence checks, file metadata and block
//! locations. Byte streams for the job's own records belong to the
//! payload and are not part of this surface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Metadata for a logical path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: String,
    pub len: u64,
    /// Milliseconds since the Unix epoch.
    pub modification_time: u64,
    pub is_dir: bool,
}

/// One physical block of a file and the hosts holding a replica of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLocation {
    pub offset: u64,
    pub length: u64,
    pub hosts: Vec<String>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Metadata for `path`. Fails with [`StorageError::NotFound`] when the
    /// path does not exist.
    async fn status(&self, path: &str) -> StorageResult<FileStatus>;

    /// Blocks overlapping `[start, start + len)`, in file order.
    async fn block_locations(
        &self,
        status: &FileStatus,
        start: u64,
        len: u64,
    ) -> StorageResult<Vec<BlockLocation>>;
}
