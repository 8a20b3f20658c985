use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Child;
use tracing::debug;

use crate::HlsError;
use crate::preset::QualityPreset;

/// Everything a backend needs to produce one job's segment stream.
#[derive(Debug, Clone)]
pub struct EncodeSpec {
    pub source: PathBuf,
    pub out_dir: PathBuf,
    pub preset: QualityPreset,
}

/// How an encode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendExit {
    Completed,
    Failed(Option<i32>),
}

/// A running encode, owned exclusively by one job coordinator.
pub trait TranscodeHandle: Send {
    /// Non-blocking exit check. `None` while the encode is still running.
    fn try_status(&mut self) -> Result<Option<BackendExit>, HlsError>;

    /// Terminate the encode. Idempotent; dropping the handle also kills the
    /// underlying process, so no exit path leaks it.
    fn kill(&mut self);
}

/// Seam between the job scheduler and the external encoder, so the engine
/// can be driven by a fake in tests.
pub trait TranscodeBackend: Send + Sync {
    fn start(&self, spec: &EncodeSpec) -> Result<Box<dyn TranscodeHandle>, HlsError>;
}

/// Production backend: one ffmpeg invocation per job, writing fixed-duration
/// MPEG-TS segments into the job directory. `temp_file` makes ffmpeg write
/// each segment under a temp name and rename it into place, which is what
/// lets the tracker treat a visible `segment-NNN.ts` as fully published.
pub struct FfmpegBackend {
    ffmpeg_path: PathBuf,
}

impl FfmpegBackend {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self { ffmpeg_path }
    }
}

impl TranscodeBackend for FfmpegBackend {
    fn start(&self, spec: &EncodeSpec) -> Result<Box<dyn TranscodeHandle>, HlsError> {
        let args = build_ffmpeg_args(spec);

        let log_path = spec.out_dir.join("ffmpeg.log");
        let log_file = std::fs::File::create(&log_path)
            .map_err(|e| HlsError::Spawn(format!("create log file: {e}")))?;

        let child = tokio::process::Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log_file))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HlsError::Spawn(format!("spawn ffmpeg: {e}")))?;

        debug!(ffmpeg = %self.ffmpeg_path.display(), ?args, "spawned ffmpeg for HLS job");
        Ok(Box::new(FfmpegHandle { child }))
    }
}

struct FfmpegHandle {
    child: Child,
}

impl TranscodeHandle for FfmpegHandle {
    fn try_status(&mut self) -> Result<Option<BackendExit>, HlsError> {
        match self.child.try_wait()? {
            None => Ok(None),
            Some(status) if status.success() => Ok(Some(BackendExit::Completed)),
            Some(status) => Ok(Some(BackendExit::Failed(status.code()))),
        }
    }

    fn kill(&mut self) {
        let _ = self.child.start_kill();
    }
}

fn build_ffmpeg_args(spec: &EncodeSpec) -> Vec<String> {
    let p = &spec.preset;
    let seg_pattern = spec.out_dir.join("segment-%03d.ts");
    // ffmpeg's own playlist; the engine renders the one it serves.
    let encode_playlist = spec.out_dir.join("encode.m3u8");

    vec![
        "-hide_banner".into(),
        "-y".into(),
        "-i".into(),
        spec.source.to_string_lossy().into_owned(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-vf".into(),
        format!("scale={}:{}", p.width, p.height),
        "-b:v".into(),
        format!("{}k", p.video_bitrate_kbps),
        "-maxrate".into(),
        format!("{}k", p.video_bitrate_kbps),
        "-bufsize".into(),
        format!("{}k", p.video_bitrate_kbps * 2),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        format!("{}k", p.audio_bitrate_kbps),
        "-ac".into(),
        "2".into(),
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        p.segment_secs.to_string(),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-hls_segment_filename".into(),
        seg_pattern.to_string_lossy().into_owned(),
        "-hls_flags".into(),
        "temp_file+independent_segments".into(),
        encode_playlist.to_string_lossy().into_owned(),
    ]
}
