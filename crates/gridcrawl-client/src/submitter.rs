//! Job submission and report polling.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use gridcrawl_core::config::ClientConfig;
use gridcrawl_core::launch::search_path_environment;
use gridcrawl_core::*;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cluster::{ApplicationSubmission, ClusterClient};
use crate::error::{SubmitError, SubmitResult};

pub struct Submitter {
    cluster: Arc<dyn ClusterClient>,
    storage: Arc<dyn Storage>,
    config: ClientConfig,
    /// Search path handed to the master, usually the task's.
    application_path: Vec<String>,
    environment: BTreeMap<String, String>,
}

impl Submitter {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        storage: Arc<dyn Storage>,
        config: ClientConfig,
        application_path: Vec<String>,
    ) -> Self {
        Self {
            cluster,
            storage,
            config,
            application_path,
            environment: BTreeMap::new(),
        }
    }

    /// Extra variable for the master's environment.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Submit `job` and follow it until the cluster reports a terminal
    /// state. `shutdown` stops the polling; the application keeps running.
    pub async fn run(
        &self,
        job: &JobSpec,
        shutdown: watch::Receiver<bool>,
    ) -> SubmitResult<ApplicationReport> {
        let id = self.submit(job).await?;
        let report = self.wait_for_terminal(&id, shutdown).await?;

        info!(
            application_id = %report.id,
            state = ?report.state,
            final_status = ?report.final_status,
            finish_time = ?report.finish_time,
            "application finished"
        );
        Ok(report)
    }

    /// Create an application and submit its master. Returns the id the
    /// cluster assigned.
    pub async fn submit(&self, job: &JobSpec) -> SubmitResult<ApplicationId> {
        if job.worker_count == 0 {
            return Err(SubmitError::InvalidWorkerCount(job.worker_count));
        }

        let id = self
            .cluster
            .create_application()
            .await
            .map_err(SubmitError::Cluster)?;
        let submission = self.build_submission(id.clone(), job).await?;

        info!(
            application_id = %id,
            queue = %submission.queue,
            resource = %submission.resource,
            "submitting application"
        );
        self.cluster
            .submit_application(submission)
            .await
            .map_err(SubmitError::Cluster)?;
        Ok(id)
    }

    /// The master's container: command, staged artifact and search path.
    pub async fn build_submission(
        &self,
        id: ApplicationId,
        job: &JobSpec,
    ) -> SubmitResult<ApplicationSubmission> {
        let status = self.storage.status(&job.artifact).await?;
        let artifact = LocalResource {
            url: status.path,
            kind: ResourceKind::File,
            visibility: ResourceVisibility::Public,
            size: status.len,
            timestamp: status.modification_time,
        };

        let mut local_resources = BTreeMap::new();
        local_resources.insert(self.config.am_artifact_name.clone(), artifact);

        let mut environment = search_path_environment(&self.application_path);
        environment.extend(self.environment.clone());

        Ok(ApplicationSubmission {
            id,
            name: self.config.app_name.clone(),
            queue: self.config.queue.clone(),
            resource: self.config.am_shape(),
            am_launch: LaunchSpec {
                commands: vec![self.config.render_am_command(job)],
                environment,
                local_resources,
            },
        })
    }

    /// Poll the application report every `report_interval_ms` until its
    /// state is `Finished`, `Killed` or `Failed`.
    pub async fn wait_for_terminal(
        &self,
        id: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> SubmitResult<ApplicationReport> {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.report_interval_ms.max(1)));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self
                        .cluster
                        .application_report(id)
                        .await
                        .map_err(SubmitError::Cluster)?;
                    debug!(application_id = %id, state = ?report.state, "application report");
                    if report.state.is_terminal() {
                        return Ok(report);
                    }
                }
                _ = stop_requested(&mut shutdown) => {
                    info!(application_id = %id, "no longer following application");
                    return Err(SubmitError::Cancelled(id.to_string()));
                }
            }
        }
    }
}

/// Resolves once `shutdown` reads `true`. A dropped sender never stops.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
