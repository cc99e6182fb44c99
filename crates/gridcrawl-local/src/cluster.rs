//! Single-host cluster: every application master is a child process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use gridcrawl_client::{ApplicationSubmission, ClusterClient};
use gridcrawl_core::*;
use tokio::process::Child;
use tracing::{info, warn};

use crate::APPLICATION_ID_ENV;
use crate::process::{self, ContainerDirs};
use crate::storage::unix_millis;

type Reports = Arc<Mutex<HashMap<ApplicationId, ApplicationReport>>>;

pub struct LocalCluster {
    root: PathBuf,
    cluster_timestamp: u64,
    next_application: AtomicU32,
    reports: Reports,
}

impl LocalCluster {
    /// Applications run under `root/<application id>`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cluster_timestamp: unix_millis(SystemTime::now()),
            next_application: AtomicU32::new(1),
            reports: Arc::default(),
        }
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut ApplicationReport)) {
        update_report(&self.reports, id, f);
    }
}

#[async_trait]
impl ClusterClient for LocalCluster {
    async fn create_application(&self) -> anyhow::Result<ApplicationId> {
        let seq = self.next_application.fetch_add(1, Ordering::Relaxed);
        let id = format!("application_{}_{seq:04}", self.cluster_timestamp);

        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id.clone(),
                ApplicationReport {
                    id: id.clone(),
                    state: ApplicationState::New,
                    final_status: FinalStatus::Undefined,
                    diagnostics: String::new(),
                    finish_time: None,
                },
            );
        Ok(id)
    }

    async fn submit_application(&self, submission: ApplicationSubmission) -> anyhow::Result<()> {
        let id = submission.id.clone();
        {
            let mut reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
            let report = reports
                .get_mut(&id)
                .ok_or_else(|| anyhow!("unknown application {id}"))?;
            if report.state != ApplicationState::New {
                bail!("application {id} was already submitted");
            }
            report.state = ApplicationState::Accepted;
        }

        info!(
            application_id = %id,
            name = %submission.name,
            queue = %submission.queue,
            resource = %submission.resource,
            "application accepted"
        );

        let mut am_launch = submission.am_launch;
        am_launch
            .environment
            .insert(APPLICATION_ID_ENV.to_string(), id.clone());
        let dirs = ContainerDirs::under(&self.root.join(&id), "master");

        // A master that cannot start fails the application, not the submission.
        match process::launch(&am_launch, &dirs).await {
            Ok(child) => {
                self.update(&id, |report| report.state = ApplicationState::Running);
                tokio::spawn(watch_master(id, child, dirs, self.reports.clone()));
            }
            Err(e) => {
                warn!(application_id = %id, error = %format!("{e:#}"), "application master failed to start");
                self.update(&id, |report| {
                    report.state = ApplicationState::Failed;
                    report.final_status = FinalStatus::Failed;
                    report.diagnostics = format!("{e:#}");
                    report.finish_time = Some(unix_millis(SystemTime::now()));
                });
            }
        }
        Ok(())
    }

    async fn application_report(&self, id: &str) -> anyhow::Result<ApplicationReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown application {id}"))
    }
}

/// Wait for the master process and settle the application's report.
async fn watch_master(id: ApplicationId, mut child: Child, dirs: ContainerDirs, reports: Reports) {
    let (state, final_status, diagnostics) = match child.wait().await {
        Ok(status) => match ContainerExit::from_exit_code(status.code()) {
            ContainerExit::Succeeded => (ApplicationState::Finished, FinalStatus::Succeeded, String::new()),
            ContainerExit::Failed { exit_code } => (
                ApplicationState::Failed,
                FinalStatus::Failed,
                format!(
                    "application master exited with code {exit_code}; logs in {}",
                    dirs.log_dir.display()
                ),
            ),
            ContainerExit::Killed => (
                ApplicationState::Killed,
                FinalStatus::Killed,
                format!("application master terminated: {status}"),
            ),
        },
        Err(e) => (ApplicationState::Failed, FinalStatus::Failed, e.to_string()),
    };

    info!(application_id = %id, ?state, ?final_status, "application master exited");
    update_report(&reports, &id, |report| {
        report.state = state;
        report.final_status = final_status;
        report.diagnostics = diagnostics;
        report.finish_time = Some(unix_millis(SystemTime::now()));
    });
}

fn update_report(reports: &Reports, id: &str, f: impl FnOnce(&mut ApplicationReport)) {
    if let Some(report) = reports
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get_mut(id)
    {
        f(report);
    }
}
