//! Capabilities the application master consumes, and the event surface it
//! exposes to the resource manager.

use std::sync::Arc;

use async_trait::async_trait;
use gridcrawl_core::*;

/// What the master tells the resource manager about itself at
/// registration. The master serves no RPC or tracking UI, so every field
/// is usually empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    pub host: String,
    pub rpc_port: u16,
    pub tracking_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterResponse {
    /// Largest container the cluster will grant.
    pub max_capability: ResourceShape,
    pub queue: String,
}

/// Client of the cluster's resource manager.
///
/// Allocation and completion notifications are delivered asynchronously to
/// the handler passed to [`ResourceManager::register`], possibly from
/// different tasks and in any order.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    async fn register(
        &self,
        registration: Registration,
        handler: Arc<dyn AmEventHandler>,
    ) -> anyhow::Result<RegisterResponse>;

    async fn add_request(&self, request: ResourceRequest) -> anyhow::Result<()>;

    async fn unregister(
        &self,
        status: FinalStatus,
        message: &str,
        tracking_url: &str,
    ) -> anyhow::Result<()>;
}

/// Client of the per-host node agents.
#[async_trait]
pub trait NodeAgent: Send + Sync {
    /// Ask the agent owning `allocation.host` to start a container. Returns
    /// once the agent accepted the request, not when the container exits.
    async fn start_container(&self, allocation: &Allocation, spec: LaunchSpec)
        -> anyhow::Result<()>;
}

/// Every event the resource manager can deliver to an application master.
///
/// Handlers must not fail: anything that goes wrong while handling an
/// event is logged and swallowed by the implementation.
#[async_trait]
pub trait AmEventHandler: Send + Sync {
    async fn on_containers_allocated(&self, allocations: Vec<Allocation>);

    async fn on_containers_completed(&self, statuses: Vec<ContainerStatus>);

    async fn on_nodes_updated(&self, nodes: Vec<NodeReport>);

    async fn on_shutdown_request(&self);

    async fn on_error(&self, error: anyhow::Error);

    /// Fraction of the job completed, reported on every heartbeat.
    fn progress(&self) -> f32;
}

/// Signals that are accepted but deliberately produce no state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoredSignal {
    NodesUpdated { count: usize },
    ShutdownRequested,
    ResourceManagerError { message: String },
}
