//! Container launch adapter.
//!
//! Builds the [`LaunchSpec`] for a granted allocation, stages the job's
//! artifact as a local resource, and hands both to the node agent. One
//! shot: no retry, no backoff, no replacement allocation.

use std::collections::BTreeMap;
use std::sync::Arc;

use gridcrawl_core::config::TaskConfig;
use gridcrawl_core::launch::search_path_environment;
use gridcrawl_core::*;
use tracing::{debug, info};

use crate::error::{MasterError, MasterResult};
use crate::protocol::NodeAgent;

pub struct ContainerLauncher {
    node_agent: Arc<dyn NodeAgent>,
    storage: Arc<dyn Storage>,
    task: TaskConfig,
    job: JobSpec,
}

impl ContainerLauncher {
    pub fn new(
        node_agent: Arc<dyn NodeAgent>,
        storage: Arc<dyn Storage>,
        task: TaskConfig,
        job: JobSpec,
    ) -> Self {
        Self {
            node_agent,
            storage,
            task,
            job,
        }
    }

    /// Start a container on `allocation`. Returns once the node agent has
    /// accepted the request; the task itself runs on.
    pub async fn launch(&self, allocation: &Allocation) -> MasterResult<()> {
        let launch_failed = |reason: String| MasterError::Launch {
            container_id: allocation.id.clone(),
            reason,
        };

        let spec = self
            .build_launch_spec()
            .await
            .map_err(|e| launch_failed(e.to_string()))?;

        info!(
            container_id = %allocation.id,
            host = %allocation.host,
            "launching container"
        );

        self.node_agent
            .start_container(allocation, spec)
            .await
            .map_err(|e| launch_failed(format!("{e:#}")))
    }

    /// Command, environment and staged artifact for one container.
    pub async fn build_launch_spec(&self) -> MasterResult<LaunchSpec> {
        let artifact = self.stage_artifact().await?;

        let mut local_resources = BTreeMap::new();
        local_resources.insert(self.task.artifact_name.clone(), artifact);

        Ok(LaunchSpec {
            commands: vec![self.task.render_command(&self.job.input, &self.job.output)],
            environment: self.environment(),
            local_resources,
        })
    }

    /// Describe the artifact as a public file resource, with the size and
    /// modification time the node agent will verify before fetching it.
    async fn stage_artifact(&self) -> MasterResult<LocalResource> {
        let status = self.storage.status(&self.job.artifact).await?;
        debug!(
            artifact = %self.job.artifact,
            size = status.len,
            timestamp = status.modification_time,
            "staging artifact"
        );

        Ok(LocalResource {
            url: status.path,
            kind: ResourceKind::File,
            visibility: ResourceVisibility::Public,
            size: status.len,
            timestamp: status.modification_time,
        })
    }

    fn environment(&self) -> BTreeMap<String, String> {
        let mut env = search_path_environment(&self.task.application_path);
        env.insert("GRIDCRAWL_INPUT".to_string(), self.job.input.clone());
        env.insert("GRIDCRAWL_OUTPUT".to_string(), self.job.output.clone());
        env
    }
}
