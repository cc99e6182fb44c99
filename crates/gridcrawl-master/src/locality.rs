//! Locality hints: preferred hosts for every container request.
//!
//! Only the hosts of the input's first block are used, for all requests,
//! whatever the worker count or file size.

use gridcrawl_core::{HostName, Storage};
use tracing::debug;

use crate::error::{MasterError, MasterResult};

/// Resolve the preferred hosts for containers reading `input`.
///
/// Fails with [`MasterError::InputNotFound`] when the dataset does not
/// exist. An empty file has no blocks and yields no hints.
pub async fn resolve_locality_hints(
    storage: &dyn Storage,
    input: &str,
) -> MasterResult<Vec<HostName>> {
    if !storage.exists(input).await? {
        return Err(MasterError::InputNotFound(input.to_string()));
    }

    let status = storage.status(input).await?;
    let blocks = storage.block_locations(&status, 0, status.len).await?;

    match blocks.into_iter().next() {
        Some(first) => {
            debug!(
                %input,
                offset = first.offset,
                length = first.length,
                hosts = ?first.hosts,
                "first block location"
            );
            Ok(first.hosts)
        }
        None => {
            debug!(%input, "input has no blocks, requesting without locality");
            Ok(Vec::new())
        }
    }
}
