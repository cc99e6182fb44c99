//! gridcrawl-master: the application master of a gridcrawl job.
//!
//! Registers the job with the cluster's resource manager, requests one
//! container per worker, launches each granted container through its
//! node agent, and counts completions until the job's target parallelism
//! is satisfied.
//!
//! # Architecture
//!
//! ```text
//! run_master (control loop)
//!   └── NegotiationCoordinator
//!       ├── ResourceManager   (register / add_request / unregister)
//!       ├── locality          (first-block hosts of the input dataset)
//!       ├── ContainerLauncher (LaunchSpec + NodeAgent::start_container)
//!       ├── SlotTable         (per-container lifecycle records)
//!       └── phase watch       (Init → … → Done → Terminated)
//!
//! ResourceManager ──async──▶ AmEventHandler (implemented by the coordinator)
//! ```

pub mod control;
pub mod coordinator;
pub mod error;
pub mod launcher;
pub mod locality;
pub mod protocol;
pub mod slots;

pub use control::{JobReport, run_master};
pub use coordinator::{NegotiationCoordinator, NegotiationSnapshot, Phase};
pub use error::{MasterError, MasterResult};
pub use launcher::ContainerLauncher;
pub use locality::resolve_locality_hints;
pub use protocol::{AmEventHandler, IgnoredSignal, NodeAgent, RegisterResponse, Registration, ResourceManager};
pub use slots::{SlotCounts, SlotState, SlotTable};
