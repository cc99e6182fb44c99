//! Node agent that runs containers as child processes of this host.

use std::path::PathBuf;

use async_trait::async_trait;
use gridcrawl_core::*;
use gridcrawl_master::NodeAgent;
use tokio::process::Child;
use tracing::{info, warn};

use crate::process::{self, ContainerDirs};
use crate::resource_manager::CompletionSink;

pub struct LocalNodeAgent {
    root: PathBuf,
    completions: CompletionSink,
}

impl LocalNodeAgent {
    /// Containers run under `root/<container id>`; their exits go to
    /// `completions`.
    pub fn new(root: impl Into<PathBuf>, completions: CompletionSink) -> Self {
        Self {
            root: root.into(),
            completions,
        }
    }
}

#[async_trait]
impl NodeAgent for LocalNodeAgent {
    async fn start_container(&self, allocation: &Allocation, spec: LaunchSpec) -> anyhow::Result<()> {
        let dirs = ContainerDirs::under(&self.root, &allocation.id);
        let child = process::launch(&spec, &dirs).await?;

        info!(
            container_id = %allocation.id,
            pid = ?child.id(),
            work_dir = %dirs.work_dir.display(),
            "container started"
        );

        tokio::spawn(watch_container(
            allocation.id.clone(),
            child,
            dirs,
            self.completions.clone(),
        ));
        Ok(())
    }
}

/// Wait for the process and report its exit.
async fn watch_container(
    container_id: ContainerId,
    mut child: Child,
    dirs: ContainerDirs,
    completions: CompletionSink,
) {
    let status = match child.wait().await {
        Ok(exit_status) => {
            let exit = ContainerExit::from_exit_code(exit_status.code());
            let diagnostics = (!exit.is_success())
                .then(|| format!("{exit_status}; logs in {}", dirs.log_dir.display()));
            ContainerStatus {
                container_id,
                exit,
                diagnostics,
            }
        }
        Err(e) => {
            warn!(%container_id, error = %e, "lost track of container process");
            ContainerStatus {
                container_id,
                exit: ContainerExit::Killed,
                diagnostics: Some(e.to_string()),
            }
        }
    };

    info!(container_id = %status.container_id, exit = ?status.exit, "container exited");
    completions.report(status);
}
