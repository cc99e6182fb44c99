pub mod config;
pub mod launch;
pub mod storage;
pub mod types;

pub use config::GridcrawlConfig;
pub use storage::{BlockLocation, FileStatus, Storage, StorageError, StorageResult};
pub use types::*;
