use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use kinema_core::error::ApiError;
use kinema_core::types::MediaType;
use kinema_db::repo::media::MediaRow;
use kinema_hls::playlist;
use kinema_hls::preset::{Quality, expected_segment_count};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncSeekExt;
use tracing::warn;

use crate::error::AppError;
use crate::state::AppState;

/// Cache header for content that never changes once generated: a segment
/// index for a given source and quality is permanent.
const IMMUTABLE_CACHE: &str = "public, max-age=31536000, immutable";

/// How many segments the VOD playlist route warms before responding.
const PREGENERATE_SEGMENTS: u32 = 3;

fn parse_quality(raw: &str) -> Result<Quality, AppError> {
    Quality::parse(raw).ok_or_else(|| {
        ApiError::BadRequest(format!("quality must be high, medium, or low, got '{raw}'")).into()
    })
}

/// Shared lookup for the HLS routes: the media row must exist, be a video,
/// and still have its source file on disk.
async fn fetch_video_media(state: &AppState, media_id: &str) -> Result<MediaRow, AppError> {
    let media = kinema_db::repo::media::get_media(&state.db, media_id)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .ok_or_else(|| ApiError::NotFound("media not found".into()))?;

    if media.media_type != MediaType::Video.as_str() {
        return Err(ApiError::BadRequest("media is not a video".into()).into());
    }
    if !std::path::Path::new(&media.path).is_file() {
        return Err(ApiError::NotFound("source file missing from disk".into()).into());
    }
    Ok(media)
}

/// GET /stream/hls/{media_id}/{quality}/{segment}
///
/// Segment names are validated before any job lookup; a malformed name can
/// never reach the cache tracker.
pub async fn hls_segment(
    State(state): State<AppState>,
    Path((media_id, quality, segment)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    let quality = parse_quality(&quality)?;
    let index = playlist::parse_segment_name(&segment)
        .ok_or_else(|| ApiError::BadRequest(format!("malformed segment name '{segment}'")))?;

    let media = fetch_video_media(&state, &media_id).await?;
    let source = PathBuf::from(&media.path);

    if !state
        .hls
        .request_hls_segment(&source, &media_id, quality, index)
        .await
    {
        return Err(ApiError::Unavailable(format!(
            "segment {index} not ready for {media_id}/{quality}, retry"
        ))
        .into());
    }

    let bytes = state
        .hls
        .get_hls_segment(&media_id, quality, &segment)
        .await
        .ok_or_else(|| {
            warn!(media_id = %media_id, quality = %quality, segment = index, "segment vanished after wait");
            ApiError::Unavailable("segment not available, retry".into())
        })?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, playlist::SEGMENT_CONTENT_TYPE),
            (header::CACHE_CONTROL, IMMUTABLE_CACHE),
        ],
        bytes,
    )
        .into_response())
}

/// GET /stream/hls/{media_id}/{quality}/index.m3u8
///
/// Full VOD playlist, available as soon as the duration is known: segments
/// are resolved lazily by the segment endpoint, so the playlist does not
/// wait for the encode to finish.
pub async fn hls_vod_playlist(
    State(state): State<AppState>,
    Path((media_id, quality)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let quality = parse_quality(&quality)?;
    let media = fetch_video_media(&state, &media_id).await?;

    let duration_secs = media
        .duration_secs
        .ok_or_else(|| ApiError::BadRequest("media duration unknown".into()))?;

    let preset = quality.preset();
    let expected = expected_segment_count(duration_secs, preset.segment_secs);
    let warm = PREGENERATE_SEGMENTS.min(expected);

    let source = PathBuf::from(&media.path);
    if !state
        .hls
        .pregenerate_initial_segments(&source, &media_id, quality, warm)
        .await
    {
        return Err(ApiError::Unavailable(format!(
            "transcoder busy for {media_id}/{quality}, retry"
        ))
        .into());
    }

    let body = state.hls.generate_vod_playlist(quality, duration_secs);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, playlist::PLAYLIST_CONTENT_TYPE),
            (header::CACHE_CONTROL, IMMUTABLE_CACHE),
        ],
        body,
    )
        .into_response())
}

/// GET /stream/hls/{media_id}/{quality}/live.m3u8
///
/// Live view of a growing playlist. Cacheable immutably only once the body
/// carries the end marker; before that, clients are told to re-poll.
pub async fn hls_live_playlist(
    State(state): State<AppState>,
    Path((media_id, quality)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let quality = parse_quality(&quality)?;
    let media = fetch_video_media(&state, &media_id).await?;
    let source = PathBuf::from(&media.path);

    if !state.hls.has_hls_cache(&media_id, quality)
        && !state.hls.is_hls_generating(&media_id, quality).await
        && !state
            .hls
            .start_hls_generation(&source, &media_id, quality)
            .await
    {
        return Err(ApiError::Unavailable(format!(
            "transcoder busy for {media_id}/{quality}, retry"
        ))
        .into());
    }

    match state.hls.get_hls_playlist(&media_id, quality).await {
        Some(body) => {
            let cache = if playlist::is_complete(&body) {
                IMMUTABLE_CACHE
            } else {
                "no-cache"
            };
            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, playlist::PLAYLIST_CONTENT_TYPE),
                    (header::CACHE_CONTROL, cache),
                ],
                body,
            )
                .into_response())
        }
        None => {
            // Generation not observable yet: hand back a bare header and ask
            // the client to come again.
            let body = playlist::empty_playlist(quality.preset().segment_secs);
            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, playlist::PLAYLIST_CONTENT_TYPE),
                    (header::CACHE_CONTROL, "no-cache"),
                    (header::RETRY_AFTER, "2"),
                ],
                body,
            )
                .into_response())
        }
    }
}

// ---------------------------------------------------------------------------
// Direct play (byte ranges)
// ---------------------------------------------------------------------------

/// Parse an HTTP Range header per RFC 7233.
/// Only supports single byte ranges: `bytes=start-end` or `bytes=start-`.
pub struct ByteRange {
    pub start: u64,
    pub end_inclusive: u64,
}

pub fn parse_range_header(range_str: &str, file_size: u64) -> Result<ByteRange, ApiError> {
    let range_str = range_str.trim();
    if !range_str.starts_with("bytes=") {
        return Err(ApiError::BadRequest("only bytes ranges supported".into()));
    }

    let spec = &range_str["bytes=".len()..];

    // Reject multi-range
    if spec.contains(',') {
        return Err(ApiError::BadRequest("multi-range not supported".into()));
    }

    let mut parts = spec.splitn(2, '-');
    let start_s = parts.next().unwrap_or("");
    let end_s = parts.next().unwrap_or("");

    if start_s.is_empty() {
        // Suffix range: bytes=-500 means last 500 bytes
        let suffix: u64 = end_s
            .parse()
            .map_err(|_| ApiError::BadRequest("bad range suffix".into()))?;
        let start = file_size.saturating_sub(suffix);
        return Ok(ByteRange {
            start,
            end_inclusive: file_size - 1,
        });
    }

    let start: u64 = start_s
        .parse()
        .map_err(|_| ApiError::BadRequest("bad range start".into()))?;

    let end: u64 = if end_s.is_empty() {
        file_size - 1
    } else {
        end_s
            .parse()
            .map_err(|_| ApiError::BadRequest("bad range end".into()))?
    };

    if start >= file_size {
        return Err(ApiError::BadRequest(format!(
            "range start {start} >= file size {file_size}"
        )));
    }

    let end = end.min(file_size - 1);

    if start > end {
        return Err(ApiError::BadRequest("range start > end".into()));
    }

    Ok(ByteRange {
        start,
        end_inclusive: end,
    })
}

/// Content-type guess from file extension.
fn content_type_for_path(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("mp4" | "m4v") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("ts") => "video/mp2t",
        Some("mpg" | "mpeg") => "video/mpeg",
        _ => "application/octet-stream",
    }
}

/// Stream a source file with HTTP Range support (Direct Play).
/// GET /stream/file/{media_id}
pub async fn stream_file_range(
    State(state): State<AppState>,
    Path(media_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let media = fetch_video_media(&state, &media_id).await?;
    let file_path = PathBuf::from(&media.path);

    // Security: only serve files that live under a library root.
    validate_path_in_library(&state, &file_path).await?;

    let file_size = tokio::fs::metadata(&file_path)
        .await
        .map_err(|e| ApiError::Internal(format!("stat error: {e}")))?
        .len();
    let content_type = content_type_for_path(&file_path);

    if let Some(range_header) = headers.get("range").and_then(|v| v.to_str().ok()) {
        let range = match parse_range_header(range_header, file_size) {
            Ok(r) => r,
            Err(_) => {
                return Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header("Content-Range", format!("bytes */{file_size}"))
                    .body(Body::empty())
                    .map_err(|e| ApiError::Internal(format!("response build: {e}")).into());
            }
        };

        let content_length = range.end_inclusive - range.start + 1;

        let mut file = tokio::fs::File::open(&file_path)
            .await
            .map_err(|e| ApiError::Internal(format!("file open error: {e}")))?;
        file.seek(std::io::SeekFrom::Start(range.start))
            .await
            .map_err(|e| ApiError::Internal(format!("seek error: {e}")))?;

        let stream = tokio_util::io::ReaderStream::new(file.take(content_length));

        Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header("Content-Type", content_type)
            .header("Content-Length", content_length.to_string())
            .header(
                "Content-Range",
                format!("bytes {}-{}/{}", range.start, range.end_inclusive, file_size),
            )
            .header("Accept-Ranges", "bytes")
            .body(Body::from_stream(stream))
            .map_err(|e| ApiError::Internal(format!("response build: {e}")).into())
    } else {
        let file = tokio::fs::File::open(&file_path)
            .await
            .map_err(|e| ApiError::Internal(format!("file open error: {e}")))?;

        let stream = tokio_util::io::ReaderStream::new(file);

        Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", content_type)
            .header("Content-Length", file_size.to_string())
            .header("Accept-Ranges", "bytes")
            .body(Body::from_stream(stream))
            .map_err(|e| ApiError::Internal(format!("response build: {e}")).into())
    }
}

/// Verify that a file path is under one of the configured library paths.
async fn validate_path_in_library(
    state: &AppState,
    file_path: &std::path::Path,
) -> Result<(), AppError> {
    let canonical = file_path
        .canonicalize()
        .map_err(|e| ApiError::Internal(format!("canonicalize error: {e}")))?;

    let lib_paths = kinema_db::repo::libraries::get_all_library_paths(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let allowed = lib_paths.iter().any(|lp| {
        if let Ok(root) = std::path::Path::new(lp).canonicalize() {
            canonical.starts_with(&root)
        } else {
            false
        }
    });

    if !allowed {
        return Err(ApiError::Forbidden("file not in any library path".into()).into());
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
