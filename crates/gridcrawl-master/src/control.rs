//! Control loop. Drives one negotiation from registration to
//! unregistration.

use std::sync::Arc;

use gridcrawl_core::FinalStatus;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::coordinator::{NegotiationCoordinator, NegotiationSnapshot};
use crate::error::MasterResult;

/// Outcome of a finished negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobReport {
    pub final_status: FinalStatus,
    pub snapshot: NegotiationSnapshot,
}

/// Run the application master until every required completion arrived.
///
/// - Registration and request failures propagate; nothing is retried.
/// - A missing input dataset unregisters with `Failed` and returns
///   [`crate::MasterError::InputNotFound`] without requesting containers.
/// - `shutdown` flipping to `true` unregisters with `Killed` and returns
///   [`crate::MasterError::Cancelled`].
/// - Otherwise the job unregisters with `Succeeded`, whatever the
///   individual container outcomes were.
pub async fn run_master(
    coordinator: Arc<NegotiationCoordinator>,
    mut shutdown: watch::Receiver<bool>,
) -> MasterResult<JobReport> {
    coordinator.register().await?;

    if let Err(e) = coordinator.request_containers().await {
        let message = e.to_string();
        if let Err(unregister_err) = coordinator.unregister(FinalStatus::Failed, &message).await {
            warn!(error = %unregister_err, "unregister after failed request phase also failed");
        }
        return Err(e);
    }

    if let Err(e) = coordinator.wait_for_completion(&mut shutdown).await {
        let message = format!(
            "{e}; {} of {} completions outstanding",
            coordinator.pending_completions(),
            coordinator.job().worker_count
        );
        coordinator.unregister(FinalStatus::Killed, &message).await?;
        return Err(e);
    }

    let snapshot = coordinator.snapshot();
    if snapshot.failed + snapshot.killed > 0 {
        warn!(
            failed = snapshot.failed,
            killed = snapshot.killed,
            "some containers did not succeed"
        );
    }

    coordinator.unregister(FinalStatus::Succeeded, "").await?;

    let report = JobReport {
        final_status: FinalStatus::Succeeded,
        snapshot: coordinator.snapshot(),
    };
    info!(
        launched = report.snapshot.launched,
        succeeded = report.snapshot.succeeded,
        "application master finished"
    );
    Ok(report)
}
