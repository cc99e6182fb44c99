//! Submit mode: hand a job to the single-host cluster and follow it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use gridcrawl_client::Submitter;
use gridcrawl_core::{ApplicationState, GridcrawlConfig, JobSpec};
use gridcrawl_local::{LocalCluster, LocalStorage};

use crate::CONFIG_ENV;

pub async fn run_submit(
    config: GridcrawlConfig,
    config_path: Option<PathBuf>,
    job: JobSpec,
) -> anyhow::Result<()> {
    let standalone = &config.standalone;
    let mut submitter = Submitter::new(
        Arc::new(LocalCluster::new(&standalone.work_dir)),
        Arc::new(LocalStorage::from_config(standalone)),
        config.client.clone(),
        config.task.application_path.clone(),
    );
    // The master reads the same file.
    if let Some(path) = config_path {
        let path = std::path::absolute(&path)?;
        submitter = submitter.with_env(CONFIG_ENV, path.to_string_lossy());
    }

    let report = submitter.run(&job, crate::shutdown_on_ctrl_c()).await?;

    if report.state != ApplicationState::Finished {
        bail!(
            "application {} ended {:?}: {}",
            report.id,
            report.state,
            report.diagnostics
        );
    }
    Ok(())
}
