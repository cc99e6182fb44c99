use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gridcrawl_client::{ClusterClient, Submitter};
use gridcrawl_core::config::{ClientConfig, ResourcesConfig, StandaloneConfig, TaskConfig};
use gridcrawl_core::*;
use gridcrawl_local::{LocalCluster, LocalNodeAgent, LocalResourceManager, LocalStorage};
use gridcrawl_master::*;
use tempfile::TempDir;
use tokio::sync::watch;

// ── Helpers ───────────────────────────────────────────────────────

struct Workspace {
    dir: TempDir,
    config: StandaloneConfig,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = StandaloneConfig {
            work_dir: dir.path().join("work").to_string_lossy().into_owned(),
            heartbeat_interval_ms: 10,
            ..StandaloneConfig::default()
        };
        Self { dir, config }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, content: &str) -> String {
        let path = self.path(name);
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn output_files(&self) -> usize {
        match std::fs::read_dir(self.path("out")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

/// Writes one file per container into the output directory.
const RECORDING_TASK: &str = "#!/bin/sh\nmkdir -p \"$2\"\necho \"$1\" > \"$2/$(basename \"$PWD\")\"\n";

async fn run_job(
    ws: &Workspace,
    input: &str,
    task: &str,
    workers: u32,
) -> (MasterResult<JobReport>, Arc<LocalResourceManager>) {
    let artifact = ws.write("task.sh", task);
    let output = ws.path("out").to_string_lossy().into_owned();

    let storage = Arc::new(LocalStorage::from_config(&ws.config));
    let rm = Arc::new(LocalResourceManager::new(
        ws.config.clone(),
        "application_1700000000000_0001",
    ));
    let agent = Arc::new(LocalNodeAgent::new(&ws.config.work_dir, rm.completion_sink()));

    let job = JobSpec::new(input, output, artifact, workers);
    let launcher = ContainerLauncher::new(agent, storage.clone(), TaskConfig::default(), job.clone());
    let coordinator =
        NegotiationCoordinator::new(job, &ResourcesConfig::default(), rm.clone(), storage, launcher)
            .unwrap();

    let (_tx, rx) = watch::channel(false);
    let result = tokio::time::timeout(Duration::from_secs(20), run_master(coordinator, rx))
        .await
        .expect("job did not finish in time");
    (result, rm)
}

#[derive(Default)]
struct RecordingHandler {
    allocations: Mutex<Vec<Allocation>>,
    completions: Mutex<Vec<ContainerStatus>>,
}

#[async_trait]
impl AmEventHandler for RecordingHandler {
    async fn on_containers_allocated(&self, allocations: Vec<Allocation>) {
        self.allocations.lock().unwrap().extend(allocations);
    }

    async fn on_containers_completed(&self, statuses: Vec<ContainerStatus>) {
        self.completions.lock().unwrap().extend(statuses);
    }

    async fn on_nodes_updated(&self, _nodes: Vec<NodeReport>) {}

    async fn on_shutdown_request(&self) {}

    async fn on_error(&self, _error: anyhow::Error) {}

    fn progress(&self) -> f32 {
        0.0
    }
}

fn request(memory_mb: u64) -> ResourceRequest {
    ResourceRequest {
        priority: Priority(0),
        capability: ResourceShape::new(memory_mb, 1),
        nodes: vec!["elsewhere".to_string()],
        relax_locality: true,
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ── Master against local backends ─────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn three_workers_run_to_completion() {
    let ws = Workspace::new();
    let input = ws.write("input.tsv", "http://example.com\n");

    let (result, rm) = run_job(&ws, &input, RECORDING_TASK, 3).await;

    let report = result.unwrap();
    assert_eq!(report.final_status, FinalStatus::Succeeded);
    assert_eq!(report.snapshot.succeeded, 3);
    assert_eq!(report.snapshot.pending_completions, 0);
    assert_eq!(ws.output_files(), 3);
    assert_eq!(rm.final_status(), Some((FinalStatus::Succeeded, String::new())));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_tasks_still_finish_the_job() {
    let ws = Workspace::new();
    let input = ws.write("input.tsv", "http://example.com\n");

    let (result, rm) = run_job(&ws, &input, "#!/bin/sh\nexit 4\n", 2).await;

    let report = result.unwrap();
    assert_eq!(report.snapshot.failed, 2);
    assert_eq!(report.snapshot.succeeded, 0);
    assert_eq!(rm.final_status().map(|(status, _)| status), Some(FinalStatus::Succeeded));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_input_fails_without_containers() {
    let ws = Workspace::new();
    let input = ws.path("missing.tsv").to_string_lossy().into_owned();

    let (result, rm) = run_job(&ws, &input, RECORDING_TASK, 2).await;

    assert!(matches!(result, Err(MasterError::InputNotFound(_))));
    assert_eq!(rm.final_status().map(|(status, _)| status), Some(FinalStatus::Failed));
    assert!(!Path::new(&ws.config.work_dir).exists());
}

// ── Resource manager ──────────────────────────────────────────────

#[tokio::test]
async fn requests_are_granted_on_the_local_node() {
    let ws = Workspace::new();
    let rm = LocalResourceManager::new(ws.config.clone(), "application_1_0001");
    let handler = Arc::new(RecordingHandler::default());

    let response = rm.register(Registration::default(), handler.clone()).await.unwrap();
    assert_eq!(response.max_capability, ResourceShape::new(8192, 8));

    for _ in 0..3 {
        rm.add_request(request(128)).await.unwrap();
    }
    eventually(|| handler.allocations.lock().unwrap().len() == 3).await;

    let allocations = handler.allocations.lock().unwrap().clone();
    assert!(allocations.iter().all(|a| a.host == "localhost"));
    let mut ids: Vec<_> = allocations.iter().map(|a| a.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn completions_are_forwarded_to_the_handler() {
    let ws = Workspace::new();
    let rm = LocalResourceManager::new(ws.config.clone(), "application_1_0001");
    let handler = Arc::new(RecordingHandler::default());
    rm.register(Registration::default(), handler.clone()).await.unwrap();

    rm.completion_sink().report(ContainerStatus {
        container_id: "container_1_0001_01_000001".to_string(),
        exit: ContainerExit::Killed,
        diagnostics: None,
    });

    eventually(|| handler.completions.lock().unwrap().len() == 1).await;
    assert_eq!(handler.completions.lock().unwrap()[0].exit, ContainerExit::Killed);
}

#[tokio::test]
async fn oversized_request_is_refused() {
    let ws = Workspace::new();
    let rm = LocalResourceManager::new(ws.config.clone(), "application_1_0001");
    rm.register(Registration::default(), Arc::new(RecordingHandler::default()))
        .await
        .unwrap();

    assert!(rm.add_request(request(1 << 20)).await.is_err());
}

#[tokio::test]
async fn second_registration_is_refused() {
    let ws = Workspace::new();
    let rm = LocalResourceManager::new(ws.config.clone(), "application_1_0001");
    rm.register(Registration::default(), Arc::new(RecordingHandler::default()))
        .await
        .unwrap();

    let again = rm
        .register(Registration::default(), Arc::new(RecordingHandler::default()))
        .await;
    assert!(again.is_err());
}

// ── Cluster ───────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn submitted_master_runs_to_finished() {
    let ws = Workspace::new();
    let artifact = ws.write("crawl.bin", "placeholder");
    let cluster = Arc::new(LocalCluster::new(&ws.config.work_dir));
    let client = ClientConfig {
        am_command: "test -x ./gridcrawl-app".to_string(),
        report_interval_ms: 10,
        ..ClientConfig::default()
    };
    let submitter = Submitter::new(
        cluster.clone(),
        Arc::new(LocalStorage::from_config(&ws.config)),
        client,
        Vec::new(),
    );

    let job = JobSpec::new("in", "out", artifact, 1);
    let (_tx, rx) = watch::channel(false);
    let report = tokio::time::timeout(Duration::from_secs(10), submitter.run(&job, rx))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.state, ApplicationState::Finished);
    assert_eq!(report.final_status, FinalStatus::Succeeded);
    assert!(report.finish_time.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_master_reports_failed() {
    let ws = Workspace::new();
    let cluster = LocalCluster::new(&ws.config.work_dir);

    let id = cluster.create_application().await.unwrap();
    cluster
        .submit_application(gridcrawl_client::ApplicationSubmission {
            id: id.clone(),
            name: "gridcrawl".to_string(),
            queue: "default".to_string(),
            resource: ResourceShape::new(256, 1),
            am_launch: LaunchSpec {
                commands: vec!["exit 2".to_string()],
                ..LaunchSpec::default()
            },
        })
        .await
        .unwrap();

    let mut report = cluster.application_report(&id).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !report.state.is_terminal() {
            tokio::time::sleep(Duration::from_millis(10)).await;
            report = cluster.application_report(&id).await.unwrap();
        }
    })
    .await
    .unwrap();

    assert_eq!(report.state, ApplicationState::Failed);
    assert_eq!(report.final_status, FinalStatus::Failed);
    assert!(report.diagnostics.contains("code 2"));
}

#[tokio::test]
async fn unknown_application_has_no_report() {
    let ws = Workspace::new();
    let cluster = LocalCluster::new(&ws.config.work_dir);

    assert!(cluster.application_report("application_0_9999").await.is_err());
}
