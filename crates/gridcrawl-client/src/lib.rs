//! gridcrawl-client: submits a gridcrawl job to a cluster and follows it
//! until the cluster reports a terminal state.
//!
//! ```text
//! Submitter
//!   ├── ClusterClient (create_application / submit / application_report)
//!   └── Storage       (stat the artifact staged for the master)
//! ```

pub mod cluster;
pub mod error;
pub mod submitter;

pub use cluster::{ApplicationSubmission, ClusterClient};
pub use error::{SubmitError, SubmitResult};
pub use submitter::Submitter;
