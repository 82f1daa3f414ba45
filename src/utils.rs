use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

/// Wall-clock time in nanoseconds since the Unix epoch
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Pin the calling thread to `core`. Returns false if the core does not exist
/// or the platform refused.
pub fn pin_current_thread(core: usize) -> bool {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!("Could not enumerate CPU cores, not pinning");
        return false;
    };

    match ids.into_iter().find(|id| id.id == core) {
        Some(id) if core_affinity::set_for_current(id) => {
            info!("Pinned thread to core {}", core);
            true
        }
        Some(_) => {
            warn!("Failed to pin thread to core {}", core);
            false
        }
        None => {
            warn!("Core {} does not exist, not pinning", core);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ns_advances() {
        let a = now_ns();
        let b = now_ns();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn test_pin_to_missing_core() {
        assert!(!pin_current_thread(usize::MAX));
    }
}
