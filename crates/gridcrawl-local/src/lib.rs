//! gridcrawl-local: the cluster capabilities backed by one host.
//!
//! Storage is the local filesystem, containers are `sh -c` child
//! processes under a work directory, and the resource manager grants every
//! request on the configured node after one heartbeat interval.
//!
//! ```text
//! LocalCluster ──spawns──▶ application master process
//!                             ├── LocalResourceManager ──heartbeat──▶ AmEventHandler
//!                             ├── LocalNodeAgent ──exit status──▶ CompletionSink
//!                             └── LocalStorage
//! ```

pub mod cluster;
pub mod node_agent;
pub mod process;
pub mod resource_manager;
pub mod storage;

pub use cluster::LocalCluster;
pub use node_agent::LocalNodeAgent;
pub use process::ContainerDirs;
pub use resource_manager::{CompletionSink, LocalResourceManager};
pub use storage::LocalStorage;

/// Environment variable naming the application a master process belongs to.
pub const APPLICATION_ID_ENV: &str = "GRIDCRAWL_APPLICATION_ID";
