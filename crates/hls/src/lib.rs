pub mod backend;
pub mod engine;
pub mod ffprobe;
pub mod job;
pub mod playlist;
pub mod preset;
pub mod reaper;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HlsError {
    #[error("encoder spawn failed: {0}")]
    Spawn(String),
    #[error("encoder exited with status {0:?}")]
    EncoderFailed(Option<i32>),
    #[error("job stalled: no segment progress for {0:?}")]
    Stalled(Duration),
    #[error("ffprobe failed: {0}")]
    Probe(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Engine configuration, injected at construction and passed down to every
/// component; there are no process-wide singletons.
#[derive(Debug, Clone)]
pub struct HlsConfig {
    pub ffmpeg_path: PathBuf,
    /// Root of the on-disk segment cache, laid out as
    /// `{cache_root}/{media_id}/{quality}/segment-NNN.ts`.
    pub cache_root: PathBuf,
    /// Admission bound: at most this many transcode jobs run at once.
    pub max_concurrent_jobs: usize,
    /// A Running job that produces no new segment within this window is
    /// killed and marked failed.
    pub stall_timeout: Duration,
    /// Upper bound on how long a single segment request may block.
    pub segment_wait_timeout: Duration,
    /// How often each job coordinator rescans its output directory.
    pub poll_interval: Duration,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            cache_root: PathBuf::from("/tmp/kinema_hls"),
            max_concurrent_jobs: 4,
            stall_timeout: Duration::from_secs(30),
            segment_wait_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(200),
        }
    }
}
