//! Data-parallel process groups
//!
//! A run is either single-process ([`LocalGroup`]) or one process per device
//! joined through a [`TcpGroup`]. Launchers communicate rank and world size
//! through the environment (`RANK`/`WORLD_SIZE`/`LOCAL_RANK`, or
//! `SLURM_PROCID`), which [`DistributedInfo::from_env`] reads.

mod env;
mod group;
mod tcp;

pub use env::{DistributedInfo, init_distributed_mode};
pub use group::{average_gradients, LocalGroup, ProcessGroup};
pub use tcp::TcpGroup;

use std::path::Path;

use serde::Serialize;

use crate::Result;

/// Whether this process is rank 0
pub fn is_main_process(group: &dyn ProcessGroup) -> bool {
    group.rank() == 0
}

/// Write `value` as JSON to `path`, on the main process only
///
/// Returns whether this process wrote the file.
pub fn save_on_master<T: Serialize>(
    group: &dyn ProcessGroup,
    value: &T,
    path: impl AsRef<Path>,
) -> Result<bool> {
    if !is_main_process(group) {
        return Ok(false);
    }
    crate::io::write_json_atomic(value, path)?;
    Ok(true)
}
