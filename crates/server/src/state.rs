use std::path::PathBuf;
use std::sync::Arc;

use sqlx::SqlitePool;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub jwt_secret: String,
    pub hls: Arc<kinema_hls::engine::HlsEngine>,
    /// Root for non-HLS caches (thumbnails).
    pub cache_dir: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
}
