//! Local filesystem storage. Paths may carry a `file://` prefix.

use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use gridcrawl_core::config::StandaloneConfig;
use gridcrawl_core::*;

/// Every block of every file lives on `node_name`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    node_name: HostName,
    block_size: u64,
}

impl LocalStorage {
    pub fn new(node_name: impl Into<HostName>, block_size: u64) -> Self {
        Self {
            node_name: node_name.into(),
            block_size: block_size.max(1),
        }
    }

    pub fn from_config(config: &StandaloneConfig) -> Self {
        Self::new(config.node_name.clone(), config.block_size)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(tokio::fs::try_exists(local_path(path)).await?)
    }

    async fn status(&self, path: &str) -> StorageResult<FileStatus> {
        let meta = tokio::fs::metadata(local_path(path))
            .await
            .map_err(|e| not_found_or_io(path, e))?;

        Ok(FileStatus {
            path: path.to_string(),
            len: meta.len(),
            modification_time: modification_millis(&meta),
            is_dir: meta.is_dir(),
        })
    }

    async fn block_locations(
        &self,
        status: &FileStatus,
        start: u64,
        len: u64,
    ) -> StorageResult<Vec<BlockLocation>> {
        if status.is_dir {
            return Ok(Vec::new());
        }

        let end = start.saturating_add(len).min(status.len);
        let mut offset = start - start % self.block_size;
        let mut blocks = Vec::new();
        while offset < end {
            blocks.push(BlockLocation {
                offset,
                length: self.block_size.min(status.len - offset),
                hosts: vec![self.node_name.clone()],
            });
            offset += self.block_size;
        }
        Ok(blocks)
    }
}

pub(crate) fn local_path(path: &str) -> &Path {
    Path::new(path.strip_prefix("file://").unwrap_or(path))
}

/// Modification time in milliseconds since the epoch, 0 when unknown.
pub(crate) fn modification_millis(meta: &Metadata) -> u64 {
    meta.modified().map(unix_millis).unwrap_or(0)
}

pub(crate) fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn not_found_or_io(path: &str, e: io::Error) -> StorageError {
    if e.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(path.to_string())
    } else {
        StorageError::Io(e)
    }
}
