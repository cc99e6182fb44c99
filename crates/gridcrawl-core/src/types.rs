//! Shared types used across gridcrawl crates.
//!
//! These mirror the records exchanged with the cluster's resource manager
//! and node agents. All types are serializable so backends can put them
//! on the wire or into logs unchanged.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier the resource manager assigns to a submitted application.
pub type ApplicationId = String;

/// Identifier of a granted container (one per [`Allocation`]).
pub type ContainerId = String;

/// Hostname of a cluster node.
pub type HostName = String;

/// Placeholder in launch commands that the node agent replaces with the
/// container's log directory.
pub const LOG_DIR_EXPANSION_VAR: &str = "<LOG_DIR>";

/// Placeholder for the container's working directory inside environment
/// values.
pub const PWD_EXPANSION_VAR: &str = "$PWD";

// ── Job ───────────────────────────────────────────────────────────

/// Immutable description of one batch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Logical location of the input dataset.
    pub input: String,
    /// Logical location the payload writes its records to.
    pub output: String,
    /// Executable artifact staged onto every container host.
    pub artifact: String,
    /// Target parallelism. Fixed for the lifetime of the job.
    pub worker_count: u32,
}

impl JobSpec {
    pub fn new(
        input: impl Into<String>,
        output: impl Into<String>,
        artifact: impl Into<String>,
        worker_count: u32,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            artifact: artifact.into(),
            worker_count,
        }
    }
}

// ── Requests and allocations ──────────────────────────────────────

/// Request priority. Lower values are more important to the resource
/// manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(pub u32);

impl Priority {
    /// Every container request of a job carries this priority.
    pub const REQUEST: Priority = Priority(0);
}

/// Memory and virtual-core quantity of one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceShape {
    pub memory_mb: u64,
    pub vcores: u32,
}

impl ResourceShape {
    pub fn new(memory_mb: u64, vcores: u32) -> Self {
        Self { memory_mb, vcores }
    }

    /// Whether this shape fits inside `max` on every dimension.
    pub fn fits_within(&self, max: &ResourceShape) -> bool {
        self.memory_mb <= max.memory_mb && self.vcores <= max.vcores
    }
}

impl fmt::Display for ResourceShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<memory:{}MB, vcores:{}>", self.memory_mb, self.vcores)
    }
}

/// A request for one container. Requests are fungible: grants are matched
/// against outstanding requests by count, never by identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub priority: Priority,
    pub capability: ResourceShape,
    /// Preferred hosts, most preferred first. Empty means anywhere.
    pub nodes: Vec<HostName>,
    /// Whether the resource manager may place the container off the
    /// preferred hosts.
    pub relax_locality: bool,
}

/// A granted, host-bound container slot. Consumed by exactly one launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: ContainerId,
    pub host: HostName,
    /// Address of the node agent owning `host` (`host:port`).
    pub node_address: String,
    pub capability: ResourceShape,
    pub priority: Priority,
}

// ── Launch specification ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    File,
    Archive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceVisibility {
    Public,
    Private,
    Application,
}

/// An artifact the node agent fetches onto the host before starting the
/// container. `size` and `timestamp` must match what storage reports, so a
/// changed artifact is refused rather than silently used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalResource {
    pub url: String,
    pub kind: ResourceKind,
    pub visibility: ResourceVisibility,
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Everything a node agent needs to start a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub commands: Vec<String>,
    pub environment: BTreeMap<String, String>,
    /// Artifacts keyed by the file name they are staged under.
    pub local_resources: BTreeMap<String, LocalResource>,
}

// ── Completion ────────────────────────────────────────────────────

/// Terminal outcome of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ContainerExit {
    Succeeded,
    Failed { exit_code: i32 },
    Killed,
}

impl ContainerExit {
    /// Map a process exit code to an outcome. `None` means the process was
    /// terminated by a signal.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => ContainerExit::Succeeded,
            Some(exit_code) => ContainerExit::Failed { exit_code },
            None => ContainerExit::Killed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ContainerExit::Succeeded)
    }
}

/// Completion report for one container, delivered once per container the
/// resource manager considers terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub container_id: ContainerId,
    pub exit: ContainerExit,
    pub diagnostics: Option<String>,
}

/// Health report for a node, delivered when the cluster's node set changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub host: HostName,
    pub healthy: bool,
}

// ── Application ───────────────────────────────────────────────────

/// Final status the application master reports when unregistering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStatus {
    Undefined,
    Succeeded,
    Failed,
    Killed,
}

/// Lifecycle state of a submitted application as seen by the resource
/// manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationState {
    New,
    Submitted,
    Accepted,
    Running,
    Finished,
    Failed,
    Killed,
}

impl ApplicationState {
    /// Whether the application has stopped for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApplicationState::Finished | ApplicationState::Failed | ApplicationState::Killed
        )
    }
}

/// Point-in-time view of a submitted application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationReport {
    pub id: ApplicationId,
    pub state: ApplicationState,
    pub final_status: FinalStatus,
    pub diagnostics: String,
    /// Unix timestamp (milliseconds) when the application stopped.
    pub finish_time: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(ApplicationState::Finished.is_terminal());
        assert!(ApplicationState::Failed.is_terminal());
        assert!(ApplicationState::Killed.is_terminal());
        assert!(!ApplicationState::Accepted.is_terminal());
        assert!(!ApplicationState::Running.is_terminal());
    }

    #[test]
    fn exit_code_mapping() {
        assert_eq!(ContainerExit::from_exit_code(Some(0)), ContainerExit::Succeeded);
        assert_eq!(
            ContainerExit::from_exit_code(Some(3)),
            ContainerExit::Failed { exit_code: 3 }
        );
        assert_eq!(ContainerExit::from_exit_code(None), ContainerExit::Killed);
    }

    #[test]
    fn shape_fits_within_max() {
        let max = ResourceShape::new(8192, 8);
        assert!(ResourceShape::new(128, 1).fits_within(&max));
        assert!(!ResourceShape::new(16384, 1).fits_within(&max));
        assert!(!ResourceShape::new(128, 16).fits_within(&max));
    }

    #[test]
    fn container_exit_serializes_tagged() {
        let json = serde_json::to_string(&ContainerExit::Failed { exit_code: 2 }).unwrap();
        assert_eq!(json, r#"{"state":"failed","exit_code":2}"#);
    }
}
