//! Master mode: the application master for one job, wired to the
//! single-host backends.
//!
//! 1. Connects the resource manager, node agent and storage backends
//! 2. Registers and requests one container per worker
//! 3. Launches every allocation and counts completions
//! 4. Unregisters and exits; non-zero when the job did not succeed

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use gridcrawl_core::{GridcrawlConfig, JobSpec, Storage};
use gridcrawl_local::{APPLICATION_ID_ENV, LocalNodeAgent, LocalResourceManager, LocalStorage};
use gridcrawl_master::{ContainerLauncher, NegotiationCoordinator, run_master};
use tracing::{error, info};

pub async fn run_master_mode(config: GridcrawlConfig, job: JobSpec) -> anyhow::Result<()> {
    let application_id = std::env::var(APPLICATION_ID_ENV).unwrap_or_else(|_| {
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        format!("application_{millis}_0001")
    });
    info!(
        %application_id,
        input = %job.input,
        output = %job.output,
        workers = job.worker_count,
        "application master starting"
    );

    // ── Backends ─────────────────────────────────────────────────
    let standalone = &config.standalone;
    let storage: Arc<dyn Storage> = Arc::new(LocalStorage::from_config(standalone));
    let resource_manager = Arc::new(LocalResourceManager::new(
        standalone.clone(),
        application_id.clone(),
    ));
    let node_agent = Arc::new(LocalNodeAgent::new(
        Path::new(&standalone.work_dir).join(&application_id),
        resource_manager.completion_sink(),
    ));

    // ── Negotiation ──────────────────────────────────────────────
    let launcher = ContainerLauncher::new(node_agent, storage.clone(), config.task.clone(), job.clone());
    let coordinator =
        NegotiationCoordinator::new(job, &config.resources, resource_manager, storage, launcher)?;

    let report = match run_master(coordinator, crate::shutdown_on_ctrl_c()).await {
        Ok(report) => report,
        Err(e) if e.is_fatal_before_negotiation() => {
            error!(%application_id, error = %e, "job aborted before any container was requested");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    info!(
        %application_id,
        final_status = ?report.final_status,
        succeeded = report.snapshot.succeeded,
        failed = report.snapshot.failed,
        killed = report.snapshot.killed,
        launch_failures = report.snapshot.launch_failures,
        discarded_allocations = report.snapshot.discarded_allocations,
        "application master stopped"
    );
    Ok(())
}
