use async_trait::async_trait;
use gridcrawl_core::{ApplicationId, ApplicationReport, LaunchSpec, ResourceShape};

/// Everything the cluster needs to start a job's application master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationSubmission {
    pub id: ApplicationId,
    pub name: String,
    pub queue: String,
    /// Resources for the master's own container.
    pub resource: ResourceShape,
    pub am_launch: LaunchSpec,
}

/// Client of the cluster's application API.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_application(&self) -> anyhow::Result<ApplicationId>;

    async fn submit_application(&self, submission: ApplicationSubmission) -> anyhow::Result<()>;

    async fn application_report(&self, id: &str) -> anyhow::Result<ApplicationReport>;
}
