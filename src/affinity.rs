//! Best-effort thread-to-core pinning.
//!
//! Pinning reduces scheduler noise so that runs are comparable; it is
//! never a correctness requirement. A platform without affinity
//! support no-ops, but a failed pin attempt on a platform that does
//! support it is a setup error, because skewed placement would
//! invalidate comparative measurements.

use anyhow::{bail, Result};
use tracing::debug;

/// Pin the calling thread to the logical core at `core_index`.
///
/// Returns `Ok(())` without pinning when the platform cannot enumerate
/// cores or when `core_index` is beyond the enumerated set.
pub fn pin_current_thread(core_index: usize) -> Result<()> {
    let cores = match core_affinity::get_core_ids() {
        Some(cores) if !cores.is_empty() => cores,
        _ => {
            debug!("thread affinity not supported on this platform");
            return Ok(());
        }
    };

    let core = match cores.get(core_index) {
        Some(core) => *core,
        None => {
            debug!(
                "logical core {} not available ({} enumerated), leaving thread unpinned",
                core_index,
                cores.len()
            );
            return Ok(());
        }
    };

    if !core_affinity::set_for_current(core) {
        bail!("failed to pin thread to logical core {}", core_index);
    }

    debug!("pinned thread to logical core {}", core_index);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_core_is_a_no_op() {
        assert!(pin_current_thread(usize::MAX).is_ok());
    }
}
