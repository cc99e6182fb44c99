//! Single-node resource manager.
//!
//! Requests queue up between heartbeats. Each heartbeat grants every queued
//! request on the configured node and forwards the completions the node
//! agent reported since the last one. The two batches are delivered from
//! separate tasks, so the handler sees them in no particular order.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use gridcrawl_core::config::StandaloneConfig;
use gridcrawl_core::*;
use gridcrawl_master::{AmEventHandler, RegisterResponse, Registration, ResourceManager};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

type Receivers = (
    mpsc::UnboundedReceiver<ResourceRequest>,
    mpsc::UnboundedReceiver<ContainerStatus>,
);

/// Hands container exit statuses to the resource manager.
#[derive(Debug, Clone)]
pub struct CompletionSink {
    tx: mpsc::UnboundedSender<ContainerStatus>,
}

impl CompletionSink {
    pub fn new(tx: mpsc::UnboundedSender<ContainerStatus>) -> Self {
        Self { tx }
    }

    pub fn report(&self, status: ContainerStatus) {
        let container_id = status.container_id.clone();
        if self.tx.send(status).is_err() {
            debug!(%container_id, "resource manager gone, completion dropped");
        }
    }
}

pub struct LocalResourceManager {
    config: StandaloneConfig,
    application_id: ApplicationId,
    requests: mpsc::UnboundedSender<ResourceRequest>,
    completions: mpsc::UnboundedSender<ContainerStatus>,
    /// Taken by the heartbeat loop on registration.
    receivers: Mutex<Option<Receivers>>,
    shutdown: watch::Sender<bool>,
    final_status: Mutex<Option<(FinalStatus, String)>>,
}

impl LocalResourceManager {
    pub fn new(config: StandaloneConfig, application_id: impl Into<ApplicationId>) -> Self {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (completions, completion_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            application_id: application_id.into(),
            requests,
            completions,
            receivers: Mutex::new(Some((request_rx, completion_rx))),
            shutdown,
            final_status: Mutex::new(None),
        }
    }

    /// Sink for the node agent to report container exits through.
    pub fn completion_sink(&self) -> CompletionSink {
        CompletionSink::new(self.completions.clone())
    }

    /// Status and message the master unregistered with, if it has.
    pub fn final_status(&self) -> Option<(FinalStatus, String)> {
        self.final_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn max_capability(&self) -> ResourceShape {
        ResourceShape::new(self.config.max_memory_mb, self.config.max_vcores)
    }
}

#[async_trait]
impl ResourceManager for LocalResourceManager {
    async fn register(
        &self,
        registration: Registration,
        handler: Arc<dyn AmEventHandler>,
    ) -> anyhow::Result<RegisterResponse> {
        let Some((requests, completions)) = self
            .receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            bail!("application {} is already registered", self.application_id);
        };

        let heartbeat = Heartbeat {
            handler,
            requests,
            completions,
            allocator: Allocator::new(&self.application_id, &self.config.node_name),
            interval: Duration::from_millis(self.config.heartbeat_interval_ms.max(1)),
        };
        tokio::spawn(heartbeat.run(self.shutdown.subscribe()));

        info!(
            application_id = %self.application_id,
            host = %registration.host,
            rpc_port = registration.rpc_port,
            "application master registered"
        );
        Ok(RegisterResponse {
            max_capability: self.max_capability(),
            queue: "default".to_string(),
        })
    }

    async fn add_request(&self, request: ResourceRequest) -> anyhow::Result<()> {
        let max = self.max_capability();
        if !request.capability.fits_within(&max) {
            bail!(
                "requested {} exceeds the maximum allocation {max}",
                request.capability
            );
        }
        // The only node here can never satisfy a strict hint for another host.
        if !request.relax_locality
            && !request.nodes.is_empty()
            && !request.nodes.contains(&self.config.node_name)
        {
            bail!(
                "strict locality on {:?} cannot be met by node {}",
                request.nodes,
                self.config.node_name
            );
        }
        if self.requests.send(request).is_err() {
            bail!("resource manager stopped");
        }
        Ok(())
    }

    async fn unregister(
        &self,
        status: FinalStatus,
        message: &str,
        _tracking_url: &str,
    ) -> anyhow::Result<()> {
        info!(
            application_id = %self.application_id,
            ?status,
            diagnostics = message,
            "application master unregistered"
        );
        *self
            .final_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((status, message.to_string()));
        self.shutdown.send_replace(true);
        Ok(())
    }
}

// ── Heartbeat ─────────────────────────────────────────────────────

struct Heartbeat {
    handler: Arc<dyn AmEventHandler>,
    requests: mpsc::UnboundedReceiver<ResourceRequest>,
    completions: mpsc::UnboundedReceiver<ContainerStatus>,
    allocator: Allocator,
    interval: Duration,
}

impl Heartbeat {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.beat(),
                _ = shutdown.changed() => {
                    debug!("heartbeat loop shutting down");
                    break;
                }
            }
        }
    }

    fn beat(&mut self) {
        let mut allocated = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            if !request.nodes.is_empty() && !request.nodes.contains(&self.allocator.node) {
                debug!(hints = ?request.nodes, "no hinted node here, relaxing locality");
            }
            allocated.push(self.allocator.grant(&request));
        }

        let mut completed = Vec::new();
        while let Ok(status) = self.completions.try_recv() {
            completed.push(status);
        }

        if !allocated.is_empty() {
            debug!(count = allocated.len(), "delivering allocations");
            let handler = self.handler.clone();
            tokio::spawn(async move { handler.on_containers_allocated(allocated).await });
        }
        if !completed.is_empty() {
            debug!(count = completed.len(), "delivering completions");
            let handler = self.handler.clone();
            tokio::spawn(async move { handler.on_containers_completed(completed).await });
        }
    }
}

/// Mints container ids for one application.
struct Allocator {
    prefix: String,
    node: HostName,
    next: u64,
}

impl Allocator {
    fn new(application_id: &str, node: &str) -> Self {
        let suffix = application_id
            .strip_prefix("application_")
            .unwrap_or(application_id);
        Self {
            prefix: format!("container_{suffix}_01"),
            node: node.to_string(),
            next: 1,
        }
    }

    fn grant(&mut self, request: &ResourceRequest) -> Allocation {
        let id = format!("{}_{:06}", self.prefix, self.next);
        self.next += 1;
        Allocation {
            id,
            host: self.node.clone(),
            node_address: self.node.clone(),
            capability: request.capability,
            priority: request.priority,
        }
    }
}
