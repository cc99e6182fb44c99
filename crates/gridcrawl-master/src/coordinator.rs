//! Negotiation coordinator: the application master's state machine.
//!
//! ```text
//! Init ─register─▶ Registered ─hints─▶ Requesting ─all issued─▶ Awaiting
//!                      │                    │                      │
//!                      └──input missing──▶ Aborted ◀──cancelled────┤
//!                                           │                      │
//!                                           ▼              pending == 0
//!                                       Terminated ◀──unregister── Done
//! ```
//!
//! Allocation and completion callbacks arrive from the resource manager's
//! delivery tasks, concurrently and in any order. The only shared mutable
//! state is the set of atomic counters plus the slot table behind a short
//! mutex; the phase is published on a `watch` channel so the control loop
//! wakes the moment the last completion lands.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use gridcrawl_core::config::ResourcesConfig;
use gridcrawl_core::*;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{MasterError, MasterResult};
use crate::launcher::ContainerLauncher;
use crate::locality::resolve_locality_hints;
use crate::protocol::*;
use crate::slots::{SlotCounts, SlotTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Registered,
    Requesting,
    Awaiting,
    Done,
    Aborted,
    Terminated,
}

impl Phase {
    /// Whether the negotiation has stopped making progress for good.
    pub fn is_settled(&self) -> bool {
        matches!(self, Phase::Done | Phase::Aborted | Phase::Terminated)
    }

    fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Init, Registered) | (Registered, Requesting) | (Requesting, Awaiting) => true,
            // Completions can outrun the last request being issued.
            (Requesting | Awaiting, Done) => true,
            (Registered | Requesting | Awaiting, Aborted) => true,
            (Done | Aborted, Terminated) => true,
            _ => false,
        }
    }
}

/// Counters shared across callback tasks.
#[derive(Debug, Default)]
struct Counters {
    /// Completions still required. Only ever decremented, floor 0.
    pending: AtomicU32,
    /// Containers the node agent accepted. Informational.
    launched: AtomicU32,
    launch_failures: AtomicU32,
    /// Allocations granted after the negotiation settled. Never launched.
    discarded_allocations: AtomicU32,
    succeeded: AtomicU32,
    failed: AtomicU32,
    killed: AtomicU32,
    /// Completions that arrived after `pending` had already hit 0.
    over_delivered: AtomicU32,
    ignored_signals: AtomicU32,
}

/// Point-in-time view of the negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationSnapshot {
    pub phase: Phase,
    pub pending_completions: u32,
    pub launched: u32,
    pub launch_failures: u32,
    pub discarded_allocations: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub killed: u32,
    pub over_delivered: u32,
    pub ignored_signals: u32,
    pub slots: SlotCounts,
}

pub struct NegotiationCoordinator {
    job: JobSpec,
    shape: ResourceShape,
    resource_manager: Arc<dyn ResourceManager>,
    storage: Arc<dyn Storage>,
    launcher: ContainerLauncher,
    counters: Counters,
    slots: Mutex<SlotTable>,
    phase: watch::Sender<Phase>,
}

impl NegotiationCoordinator {
    /// Create a coordinator for `job`. The worker count must be at least 1.
    pub fn new(
        job: JobSpec,
        resources: &ResourcesConfig,
        resource_manager: Arc<dyn ResourceManager>,
        storage: Arc<dyn Storage>,
        launcher: ContainerLauncher,
    ) -> MasterResult<Arc<Self>> {
        if job.worker_count == 0 {
            return Err(MasterError::InvalidWorkerCount(job.worker_count));
        }

        let counters = Counters {
            pending: AtomicU32::new(job.worker_count),
            ..Counters::default()
        };
        let (phase, _) = watch::channel(Phase::Init);

        Ok(Arc::new(Self {
            shape: resources.shape(),
            job,
            resource_manager,
            storage,
            launcher,
            counters,
            slots: Mutex::new(SlotTable::default()),
            phase,
        }))
    }

    /// Register with the resource manager and install this coordinator as
    /// its event handler.
    pub async fn register(self: &Arc<Self>) -> MasterResult<RegisterResponse> {
        info!(input = %self.job.input, workers = self.job.worker_count, "registering application master");

        let handler: Arc<dyn AmEventHandler> = self.clone();
        let registration = Registration::default();
        debug!(
            host = %registration.host,
            rpc_port = registration.rpc_port,
            tracking_url = %registration.tracking_url,
            "registration details"
        );
        let response = self
            .resource_manager
            .register(registration, handler)
            .await
            .map_err(MasterError::ResourceManager)?;
        info!(queue = %response.queue, max = %response.max_capability, "registered with resource manager");

        if !self.shape.fits_within(&response.max_capability) {
            warn!(
                requested = %self.shape,
                max = %response.max_capability,
                "container shape exceeds cluster maximum"
            );
        }

        self.advance(Phase::Registered);
        Ok(response)
    }

    /// Resolve locality hints and issue one request per worker.
    ///
    /// A missing input dataset moves the coordinator to `Aborted` before
    /// any request is issued. Returns the number of requests issued.
    pub async fn request_containers(&self) -> MasterResult<usize> {
        let hosts = match resolve_locality_hints(self.storage.as_ref(), &self.job.input).await {
            Ok(hosts) => hosts,
            Err(e) => {
                match &e {
                    MasterError::InputNotFound(_) => {
                        error!(input = %self.job.input, "input dataset does not exist, no containers requested")
                    }
                    other => error!(input = %self.job.input, error = %other, "failed to resolve locality hints"),
                }
                self.advance(Phase::Aborted);
                return Err(e);
            }
        };

        self.advance(Phase::Requesting);

        let count = self.job.worker_count as usize;
        // The table must exist before the first grant can arrive.
        *self.slot_table() = SlotTable::with_requested(count);

        for i in 0..count {
            let request = ResourceRequest {
                priority: Priority::REQUEST,
                capability: self.shape,
                nodes: hosts.clone(),
                relax_locality: true,
            };
            info!(request = i, hosts = ?hosts, "making resource request");
            if let Err(e) = self.resource_manager.add_request(request).await {
                self.advance(Phase::Aborted);
                return Err(MasterError::ResourceManager(e));
            }
        }

        self.advance(Phase::Awaiting);
        Ok(count)
    }

    /// Wait until every required completion has arrived, or until
    /// `shutdown` flips to `true`.
    pub async fn wait_for_completion(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> MasterResult<()> {
        let mut phase = self.phase.subscribe();

        // A job that completed wins over a simultaneous shutdown.
        tokio::select! {
            biased;
            settled = phase.wait_for(Phase::is_settled) => {
                match settled.map(|p| *p) {
                    Ok(Phase::Done) => Ok(()),
                    _ => Err(MasterError::Cancelled),
                }
            }
            _ = shutdown_requested(shutdown) => {
                info!(pending = self.pending_completions(), "shutdown requested while awaiting completions");
                self.advance(Phase::Aborted);
                Err(MasterError::Cancelled)
            }
        }
    }

    /// Unregister from the resource manager with a final status.
    pub async fn unregister(&self, status: FinalStatus, message: &str) -> MasterResult<()> {
        info!(?status, %message, "unregistering application master");
        self.resource_manager
            .unregister(status, message, "")
            .await
            .map_err(MasterError::ResourceManager)?;
        self.advance(Phase::Terminated);
        Ok(())
    }

    pub fn job(&self) -> &JobSpec {
        &self.job
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn pending_completions(&self) -> u32 {
        self.counters.pending.load(Ordering::Acquire)
    }

    pub fn launched_count(&self) -> u32 {
        self.counters.launched.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.pending_completions() == 0
    }

    pub fn snapshot(&self) -> NegotiationSnapshot {
        let c = &self.counters;
        NegotiationSnapshot {
            phase: self.phase(),
            pending_completions: c.pending.load(Ordering::Acquire),
            launched: c.launched.load(Ordering::Acquire),
            launch_failures: c.launch_failures.load(Ordering::Acquire),
            discarded_allocations: c.discarded_allocations.load(Ordering::Acquire),
            succeeded: c.succeeded.load(Ordering::Acquire),
            failed: c.failed.load(Ordering::Acquire),
            killed: c.killed.load(Ordering::Acquire),
            over_delivered: c.over_delivered.load(Ordering::Acquire),
            ignored_signals: c.ignored_signals.load(Ordering::Acquire),
            slots: self.slot_table().counts(),
        }
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn advance(&self, next: Phase) -> bool {
        let mut from = None;
        let advanced = self.phase.send_if_modified(|current| {
            if current.can_advance_to(next) {
                from = Some(*current);
                *current = next;
                true
            } else {
                false
            }
        });

        match from {
            Some(from) => info!(?from, to = ?next, "negotiation phase changed"),
            None => debug!(current = ?self.phase(), rejected = ?next, "phase change ignored"),
        }
        advanced
    }

    fn slot_table(&self) -> MutexGuard<'_, SlotTable> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn launch_one(&self, allocation: &Allocation) {
        let index = self.slot_table().claim(allocation);

        match self.launcher.launch(allocation).await {
            Ok(()) => {
                self.slot_table().mark_launched(index);
                let launched = self.counters.launched.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(container_id = %allocation.id, slot = index, launched, "container launched");
            }
            Err(e) => {
                // The allocation is dropped; the job runs one worker short.
                error!(container_id = %allocation.id, error = %e, "error launching container");
                self.slot_table().mark_launch_failed(index, e.to_string());
                self.counters.launch_failures.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    fn record_outcome(&self, status: &ContainerStatus) {
        let counter = match status.exit {
            ContainerExit::Succeeded => &self.counters.succeeded,
            ContainerExit::Failed { .. } => &self.counters.failed,
            ContainerExit::Killed => &self.counters.killed,
        };
        counter.fetch_add(1, Ordering::AcqRel);

        let slot = self.slot_table().record_completion(status);
        info!(
            container_id = %status.container_id,
            exit = ?status.exit,
            diagnostics = status.diagnostics.as_deref().unwrap_or(""),
            slot = ?slot,
            "completed container"
        );
    }

    /// Subtract `count` completions in a single atomic update. Returns true
    /// for the one caller that brought the counter to zero.
    fn count_completions(&self, count: u32) -> bool {
        let update = self
            .counters
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                (pending > 0).then(|| pending.saturating_sub(count))
            });

        match update {
            Ok(previous) => {
                if count > previous {
                    let extra = count - previous;
                    self.counters.over_delivered.fetch_add(extra, Ordering::AcqRel);
                    warn!(extra, "more completions than workers requested");
                }
                previous <= count
            }
            Err(_) => {
                self.counters.over_delivered.fetch_add(count, Ordering::AcqRel);
                warn!(count, "completions received after the job was done");
                false
            }
        }
    }

    fn ignore(&self, signal: IgnoredSignal) {
        self.counters.ignored_signals.fetch_add(1, Ordering::AcqRel);
        debug!(?signal, "signal accepted without state change");
    }
}

#[async_trait]
impl AmEventHandler for NegotiationCoordinator {
    async fn on_containers_allocated(&self, allocations: Vec<Allocation>) {
        info!(count = allocations.len(), "containers allocated");
        for allocation in &allocations {
            // Checked per allocation: the last completion can land mid-batch.
            let phase = self.phase();
            if phase.is_settled() {
                self.counters.discarded_allocations.fetch_add(1, Ordering::AcqRel);
                warn!(container_id = %allocation.id, host = %allocation.host, ?phase, "allocation after negotiation settled, not launching");
                continue;
            }
            self.launch_one(allocation).await;
        }
    }

    async fn on_containers_completed(&self, statuses: Vec<ContainerStatus>) {
        if statuses.is_empty() {
            return;
        }

        // Every outcome counts toward completion; the split is only
        // reported through the snapshot.
        for status in &statuses {
            self.record_outcome(status);
        }

        if self.count_completions(statuses.len() as u32) {
            info!("all containers completed");
            self.advance(Phase::Done);
        }
    }

    async fn on_nodes_updated(&self, nodes: Vec<NodeReport>) {
        self.ignore(IgnoredSignal::NodesUpdated { count: nodes.len() });
    }

    async fn on_shutdown_request(&self) {
        self.ignore(IgnoredSignal::ShutdownRequested);
    }

    async fn on_error(&self, error: anyhow::Error) {
        self.ignore(IgnoredSignal::ResourceManagerError {
            message: format!("{error:#}"),
        });
    }

    fn progress(&self) -> f32 {
        0.0
    }
}

/// Resolves once `shutdown` holds `true`. A dropped sender never cancels.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        assert!(Phase::Init.can_advance_to(Phase::Registered));
        assert!(Phase::Registered.can_advance_to(Phase::Requesting));
        assert!(Phase::Requesting.can_advance_to(Phase::Awaiting));
        assert!(Phase::Awaiting.can_advance_to(Phase::Done));
        assert!(Phase::Done.can_advance_to(Phase::Terminated));
        assert!(Phase::Registered.can_advance_to(Phase::Aborted));
        assert!(Phase::Aborted.can_advance_to(Phase::Terminated));
    }

    #[test]
    fn settled_phases_are_sticky() {
        assert!(!Phase::Done.can_advance_to(Phase::Awaiting));
        assert!(!Phase::Done.can_advance_to(Phase::Aborted));
        assert!(!Phase::Aborted.can_advance_to(Phase::Done));
        assert!(!Phase::Terminated.can_advance_to(Phase::Done));
        assert!(!Phase::Init.can_advance_to(Phase::Done));
    }

    #[test]
    fn settled_set() {
        assert!(Phase::Done.is_settled());
        assert!(Phase::Aborted.is_settled());
        assert!(Phase::Terminated.is_settled());
        assert!(!Phase::Awaiting.is_settled());
    }
}
