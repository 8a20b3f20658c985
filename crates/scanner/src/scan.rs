use std::path::Path;

use kinema_core::types::MediaType;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::walk;
use crate::{ScanError, ScanResult};

/// Run a full scan for a library: walk its root paths, probe durations, and
/// insert media rows for files the catalog has not seen yet.
pub async fn run_library_scan(
    pool: &SqlitePool,
    ffprobe_path: &Path,
    library_id: &str,
) -> Result<ScanResult, ScanError> {
    let paths = kinema_db::repo::libraries::get_library_paths(pool, library_id).await?;

    let mut result = ScanResult::default();

    for lib_path in &paths {
        let root = Path::new(&lib_path.path);
        if !root.exists() {
            warn!(path = %lib_path.path, "library path does not exist, skipping");
            continue;
        }

        let entries = walk::walk_media_dir(root);
        info!(
            library_id,
            path = %lib_path.path,
            files_found = entries.len(),
            "scan found video files"
        );

        for entry in &entries {
            let path_str = entry.path.to_string_lossy().to_string();

            if kinema_db::repo::media::media_exists_by_path(pool, &path_str).await? {
                result.skipped += 1;
                continue;
            }

            // Duration stays NULL when the probe fails; the VOD playlist
            // route requires it, the live route does not.
            let duration_secs = match kinema_hls::ffprobe::probe(ffprobe_path, &entry.path).await
            {
                Ok(probe) if probe.duration_secs > 0.0 => Some(probe.duration_secs),
                Ok(_) => None,
                Err(e) => {
                    warn!(path = %path_str, error = %e, "probe failed, duration left unset");
                    None
                }
            };

            let title = title_from_path(&entry.path);
            kinema_db::repo::media::insert_media(
                pool,
                library_id,
                &path_str,
                MediaType::Video.as_str(),
                &title,
                duration_secs,
                entry.size_bytes as i64,
                entry.mtime_ts,
            )
            .await?;
            result.added += 1;
        }
    }

    Ok(result)
}

/// Derive a display title from a filename: strip the extension and unclutter
/// common separator characters.
fn title_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled".to_string());

    let cleaned: String = stem
        .chars()
        .map(|c| if c == '.' || c == '_' { ' ' } else { c })
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "Untitled".to_string()
    } else {
        collapsed
    }
}
