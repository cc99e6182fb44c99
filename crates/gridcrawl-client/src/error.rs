use gridcrawl_core::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("cluster request failed: {0:#}")]
    Cluster(anyhow::Error),

    #[error("artifact staging failed: {0}")]
    Storage(#[from] StorageError),

    #[error("worker count must be positive, got {0}")]
    InvalidWorkerCount(u32),

    #[error("stopped following application {0}")]
    Cancelled(String),
}

pub type SubmitResult<T> = Result<T, SubmitError>;
