use std::collections::HashSet;
use std::path::{Path, PathBuf};

use axum::extract::{Path as UrlPath, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use kinema_core::error::ApiError;
use kinema_core::types::MediaType;
use tracing::{info, warn};

use crate::auth::{AuthUser, require_library_access};
use crate::error::AppError;
use crate::state::AppState;

/// Seek offset for the frame grab; far enough in to skip studio logos.
const THUMBNAIL_OFFSET_SECS: u32 = 10;

fn thumbs_dir(cache_dir: &Path) -> PathBuf {
    cache_dir.join("thumbs")
}

fn thumb_path(cache_dir: &Path, media_id: &str) -> PathBuf {
    thumbs_dir(cache_dir).join(format!("{media_id}.jpg"))
}

/// GET /api/v1/media/{id}/thumbnail
///
/// Lazily grabs one frame from the source and caches it on disk; subsequent
/// requests are served straight from the cache.
pub async fn get_media_thumbnail(
    auth: AuthUser,
    State(state): State<AppState>,
    UrlPath(media_id): UrlPath<String>,
) -> Result<Response, AppError> {
    let media = kinema_db::repo::media::get_media(&state.db, &media_id)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .ok_or_else(|| ApiError::NotFound("media not found".into()))?;
    require_library_access(&auth, &state, &media.library_id).await?;

    if media.media_type != MediaType::Video.as_str() {
        return Err(ApiError::BadRequest("thumbnails are only generated for videos".into()).into());
    }

    let source = PathBuf::from(&media.path);
    if !source.is_file() {
        return Err(ApiError::NotFound("source file missing from disk".into()).into());
    }

    let dest = thumb_path(&state.cache_dir, &media_id);
    if !dest.is_file() {
        tokio::fs::create_dir_all(thumbs_dir(&state.cache_dir))
            .await
            .map_err(|e| ApiError::Internal(format!("cache dir error: {e}")))?;
        generate_thumbnail(&state.ffmpeg_path, &source, &dest).await?;
        info!(media_id = %media_id, "thumbnail generated");
    }

    let bytes = tokio::fs::read(&dest)
        .await
        .map_err(|e| ApiError::Internal(format!("thumbnail read error: {e}")))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "public, max-age=86400"),
        ],
        bytes,
    )
        .into_response())
}

/// Grab a single scaled frame. The frame lands under a temp name and is
/// renamed into place, same publication rule as HLS segments.
async fn generate_thumbnail(
    ffmpeg_path: &Path,
    source: &Path,
    dest: &Path,
) -> Result<(), AppError> {
    // ffmpeg picks the output format from the extension, so the temp name
    // keeps a .jpg suffix.
    let tmp = dest.with_extension("tmp.jpg");

    let status = tokio::process::Command::new(ffmpeg_path)
        .args(["-hide_banner", "-y"])
        .arg("-ss")
        .arg(THUMBNAIL_OFFSET_SECS.to_string())
        .arg("-i")
        .arg(source)
        .args(["-frames:v", "1", "-vf", "scale=320:-2"])
        .arg(&tmp)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map_err(|e| ApiError::Internal(format!("ffmpeg spawn failed: {e}")))?;

    if !status.success() || !tmp.is_file() {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ApiError::Internal("thumbnail generation failed".into()).into());
    }

    tokio::fs::rename(&tmp, dest)
        .await
        .map_err(|e| ApiError::Internal(format!("thumbnail publish failed: {e}")).into())
}

/// Remove cached thumbnails whose media row no longer exists. Returns the
/// number of files removed.
pub fn cleanup_orphaned_thumbnails(cache_dir: &Path, live_ids: &HashSet<String>) -> usize {
    let Ok(read_dir) = std::fs::read_dir(thumbs_dir(cache_dir)) else {
        return 0;
    };

    let mut removed = 0;
    for entry in read_dir.flatten() {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if live_ids.contains(stem) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(media_id = stem, "removed orphaned thumbnail");
                removed += 1;
            }
            Err(e) => {
                warn!(media_id = stem, error = %e, "failed to remove orphaned thumbnail");
            }
        }
    }
    removed
}
