use std::collections::HashSet;
use std::time::Duration;

use tracing::{info, warn};

use crate::state::AppState;
use crate::thumbs;

/// Spawn the periodic orphan reaper: removes HLS caches and thumbnails for
/// media rows that have left the catalog.
pub fn spawn_orphan_reaper(state: AppState, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            run_orphan_sweep(&state).await;
        }
    });
}

pub async fn run_orphan_sweep(state: &AppState) {
    let ids = match kinema_db::repo::media::list_media_ids(&state.db).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "orphan sweep skipped: cannot list media ids");
            return;
        }
    };

    let mut live: HashSet<String> = ids.into_iter().collect();
    // In-flight jobs keep their cache trees even if the row just vanished;
    // the next sweep catches them once the job is gone.
    for media_id in state.hls.generating_media_ids().await {
        live.insert(media_id);
    }

    let hls_removed = kinema_hls::reaper::sweep_orphans(state.hls.cache_root(), &live);
    let thumbs_removed = thumbs::cleanup_orphaned_thumbnails(&state.cache_dir, &live);

    if hls_removed + thumbs_removed > 0 {
        info!(
            hls = hls_removed,
            thumbnails = thumbs_removed,
            "orphan sweep removed cache entries"
        );
    }
}
