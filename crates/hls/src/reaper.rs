use std::collections::HashSet;
use std::path::Path;

use tracing::{info, warn};

/// Remove cached HLS trees whose media id is no longer in the catalog.
/// `live_ids` must include ids with in-flight jobs so a running encode is
/// never swept out from under its coordinator. Returns the number of trees
/// removed.
pub fn sweep_orphans(cache_root: &Path, live_ids: &HashSet<String>) -> usize {
    let Ok(read_dir) = std::fs::read_dir(cache_root) else {
        return 0;
    };

    let mut removed = 0;
    for entry in read_dir.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if live_ids.contains(name) {
            continue;
        }

        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                info!(media_id = name, "removed orphaned HLS cache");
                removed += 1;
            }
            Err(e) => {
                warn!(media_id = name, error = %e, "failed to remove orphaned HLS cache");
            }
        }
    }
    removed
}
