use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::backend::{BackendExit, EncodeSpec, FfmpegBackend, TranscodeBackend};
use crate::job::{JobEntry, JobKey, JobProgress, JobState};
use crate::playlist;
use crate::preset::Quality;
use crate::{HlsConfig, HlsError};

/// Name of the persisted manifest a completed job leaves behind. Its
/// presence is what makes a cache entry "complete" across restarts.
const MANIFEST_NAME: &str = "index.m3u8";

/// On-demand HLS transcoding engine: per-key job table, bounded admission,
/// segment readiness tracking, and playlist rendering. One instance per
/// process, constructed explicitly with its configuration and backend.
pub struct HlsEngine {
    config: HlsConfig,
    backend: Arc<dyn TranscodeBackend>,
    inner: Arc<Mutex<EngineInner>>,
}

#[derive(Default)]
struct EngineInner {
    jobs: HashMap<JobKey, Arc<JobEntry>>,
    running: usize,
}

impl HlsEngine {
    pub fn new(config: HlsConfig) -> Self {
        let backend = Arc::new(FfmpegBackend::new(config.ffmpeg_path.clone()));
        Self::with_backend(config, backend)
    }

    /// Construct with an injected backend (tests use a fake that publishes
    /// segments on a controlled schedule).
    pub fn with_backend(config: HlsConfig, backend: Arc<dyn TranscodeBackend>) -> Self {
        Self {
            config,
            backend,
            inner: Arc::new(Mutex::new(EngineInner::default())),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.config.cache_root
    }

    fn job_dir(&self, media_id: &str, quality: Quality) -> PathBuf {
        self.config
            .cache_root
            .join(media_id)
            .join(quality.as_str())
    }

    fn segment_path(&self, media_id: &str, quality: Quality, index: u32) -> PathBuf {
        self.job_dir(media_id, quality)
            .join(playlist::segment_file_name(index))
    }

    /// True iff a completed cache exists for the key: the manifest written
    /// at job completion doubles as the completeness marker.
    pub fn has_hls_cache(&self, media_id: &str, quality: Quality) -> bool {
        self.job_dir(media_id, quality).join(MANIFEST_NAME).is_file()
    }

    /// True iff a job for the key is currently queued or running.
    pub async fn is_hls_generating(&self, media_id: &str, quality: Quality) -> bool {
        let inner = self.inner.lock().await;
        matches!(
            inner
                .jobs
                .get(&JobKey::new(media_id, quality))
                .map(|e| e.snapshot().state),
            Some(JobState::Queued | JobState::Running)
        )
    }

    /// Current progress of the live job for a key, if one exists.
    pub async fn job_progress(&self, media_id: &str, quality: Quality) -> Option<JobProgress> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .get(&JobKey::new(media_id, quality))
            .map(|e| e.snapshot())
    }

    /// Media ids with a live job. The reaper must not sweep these even if
    /// the catalog row disappeared mid-encode.
    pub async fn generating_media_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.jobs.keys().map(|k| k.media_id.clone()).collect()
    }

    /// Start transcoding for a key, or attach to the job already doing so.
    /// Returns false only when the scheduler is saturated; callers surface
    /// that as backpressure rather than queueing.
    pub async fn start_hls_generation(
        &self,
        source: &Path,
        media_id: &str,
        quality: Quality,
    ) -> bool {
        if self.has_hls_cache(media_id, quality) {
            return true;
        }
        self.ensure_job(source, media_id, quality).await.is_some()
    }

    /// Block until the requested segment is ready, the job fails, or the
    /// configured timeout lapses. Generation is sequential, so a request for
    /// index N implicitly waits for everything below it.
    pub async fn request_hls_segment(
        &self,
        source: &Path,
        media_id: &str,
        quality: Quality,
        index: u32,
    ) -> bool {
        if self.has_hls_cache(media_id, quality) {
            return self.segment_path(media_id, quality, index).is_file();
        }

        let Some(entry) = self.ensure_job(source, media_id, quality).await else {
            warn!(
                media_id,
                quality = %quality,
                segment = index,
                "segment request rejected: transcoder saturated"
            );
            return false;
        };

        self.await_segment(&entry, index).await
    }

    /// Warm the head of the stream: one attach plus one wait on the highest
    /// requested index (indices below it are satisfied by sequential
    /// generation).
    pub async fn pregenerate_initial_segments(
        &self,
        source: &Path,
        media_id: &str,
        quality: Quality,
        count: u32,
    ) -> bool {
        if count == 0 {
            return true;
        }
        self.request_hls_segment(source, media_id, quality, count - 1)
            .await
    }

    /// Bytes for a segment, if it is servable right now. Absent is a cache
    /// miss, never an error: unready indices, malformed names, and unknown
    /// keys all land here.
    pub async fn get_hls_segment(
        &self,
        media_id: &str,
        quality: Quality,
        segment_name: &str,
    ) -> Option<Vec<u8>> {
        let index = playlist::parse_segment_name(segment_name)?;

        let live = {
            let inner = self.inner.lock().await;
            inner
                .jobs
                .get(&JobKey::new(media_id, quality))
                .map(|e| e.snapshot())
        };

        let servable = match live {
            Some(progress) => index < progress.ready,
            None => self.has_hls_cache(media_id, quality),
        };
        if !servable {
            return None;
        }

        tokio::fs::read(self.segment_path(media_id, quality, index))
            .await
            .ok()
    }

    /// Current playlist for a key: the persisted manifest once complete, a
    /// growing playlist of ready segments while a job is live, absent when
    /// generation has not started.
    pub async fn get_hls_playlist(&self, media_id: &str, quality: Quality) -> Option<String> {
        let manifest = self.job_dir(media_id, quality).join(MANIFEST_NAME);
        if let Ok(text) = tokio::fs::read_to_string(&manifest).await {
            return Some(text);
        }

        let progress = self.job_progress(media_id, quality).await?;
        Some(playlist::partial_playlist(
            quality.preset().segment_secs,
            progress.ready,
        ))
    }

    /// Full VOD playlist for a known duration, independent of which segments
    /// exist yet.
    pub fn generate_vod_playlist(&self, quality: Quality, duration_secs: f64) -> String {
        playlist::vod_playlist(quality.preset().segment_secs, duration_secs)
    }

    /// Look up or create the job for a key. Holding the table lock covers
    /// both the lookup and the admission decision; the coordinator task is
    /// spawned after the lock is released.
    async fn ensure_job(
        &self,
        source: &Path,
        media_id: &str,
        quality: Quality,
    ) -> Option<Arc<JobEntry>> {
        let key = JobKey::new(media_id, quality);
        let entry = {
            let mut inner = self.inner.lock().await;

            if let Some(existing) = inner.jobs.get(&key) {
                if existing.snapshot().state != JobState::Failed {
                    return Some(existing.clone());
                }
                // Failed leftover awaiting removal by its coordinator; a
                // fresh job replaces it.
                inner.jobs.remove(&key);
            }

            if inner.running >= self.config.max_concurrent_jobs {
                return None;
            }
            inner.running += 1;

            let entry = Arc::new(JobEntry::new(
                key.clone(),
                source.to_path_buf(),
                self.job_dir(media_id, quality),
            ));
            inner.jobs.insert(key, entry.clone());
            entry
        };

        tokio::spawn(run_job(
            self.config.clone(),
            self.backend.clone(),
            self.inner.clone(),
            entry.clone(),
        ));

        Some(entry)
    }

    /// Wait outside any lock for the watch channel to report the index
    /// ready. Bounded by the configured segment wait timeout.
    async fn await_segment(&self, entry: &JobEntry, index: u32) -> bool {
        let mut rx = entry.subscribe();
        let wait = async {
            loop {
                let progress = *rx.borrow_and_update();
                if progress.ready > index {
                    return true;
                }
                match progress.state {
                    JobState::Failed => return false,
                    // Complete with the index still unready: the source was
                    // shorter than the request; the segment will never exist.
                    JobState::Complete => return false,
                    JobState::Queued | JobState::Running => {}
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };

        match tokio::time::timeout(self.config.segment_wait_timeout, wait).await {
            Ok(ready) => ready,
            Err(_) => {
                warn!(
                    job = %entry.key,
                    segment = index,
                    timeout = ?self.config.segment_wait_timeout,
                    "timed out waiting for segment"
                );
                false
            }
        }
    }
}

/// Per-job coordinator: owns the backend handle for the job's lifetime and
/// is the only writer of its state. Always releases the admission slot and
/// clears the table entry on the way out.
async fn run_job(
    config: HlsConfig,
    backend: Arc<dyn TranscodeBackend>,
    inner: Arc<Mutex<EngineInner>>,
    entry: Arc<JobEntry>,
) {
    info!(job = %entry.key, source = %entry.source.display(), "transcode job starting");

    match drive_job(&config, backend.as_ref(), &entry).await {
        Ok(segments) => {
            info!(job = %entry.key, segments, "transcode job complete");
        }
        Err(err) => {
            // Ready segments are immutable and stay valid; only the
            // unpublished temp tail is removed.
            remove_unpublished_tail(&entry.dir);
            entry.set_state(JobState::Failed);
            warn!(
                job = %entry.key,
                ready = entry.snapshot().ready,
                error = %err,
                "transcode job failed"
            );
        }
    }

    let mut guard = inner.lock().await;
    // A failed entry may already have been replaced by a fresh job under the
    // same key; only remove the entry this coordinator owns.
    if guard
        .jobs
        .get(&entry.key)
        .is_some_and(|current| Arc::ptr_eq(current, &entry))
    {
        guard.jobs.remove(&entry.key);
    }
    guard.running -= 1;
}

async fn drive_job(
    config: &HlsConfig,
    backend: &dyn TranscodeBackend,
    entry: &JobEntry,
) -> Result<u32, HlsError> {
    tokio::fs::create_dir_all(&entry.dir).await?;

    let preset = entry.key.quality.preset();
    let spec = EncodeSpec {
        source: entry.source.clone(),
        out_dir: entry.dir.clone(),
        preset,
    };
    let mut handle = backend.start(&spec)?;
    entry.set_state(JobState::Running);

    let mut last_activity = Instant::now();
    let mut ticker = tokio::time::interval(config.poll_interval);

    loop {
        ticker.tick().await;

        let ready = scan_ready_count(&entry.dir);
        if ready > entry.snapshot().ready {
            entry.set_ready(ready);
            last_activity = Instant::now();
        }

        match handle.try_status()? {
            None => {}
            Some(BackendExit::Completed) => {
                let total = scan_ready_count(&entry.dir);
                entry.set_ready(total);
                write_manifest(&entry.dir, preset.segment_secs, total).await?;
                entry.set_state(JobState::Complete);
                return Ok(total);
            }
            Some(BackendExit::Failed(code)) => {
                return Err(HlsError::EncoderFailed(code));
            }
        }

        if last_activity.elapsed() >= config.stall_timeout {
            handle.kill();
            return Err(HlsError::Stalled(config.stall_timeout));
        }
    }
}

/// Persist the final playlist next to the segments. Written to a temp name
/// and renamed so its visibility follows the same publication rule as the
/// segments themselves.
async fn write_manifest(dir: &Path, segment_secs: u32, total: u32) -> Result<(), HlsError> {
    let text = playlist::complete_playlist(segment_secs, total);
    let tmp = dir.join(format!("{MANIFEST_NAME}.tmp"));
    tokio::fs::write(&tmp, text.as_bytes()).await?;
    tokio::fs::rename(&tmp, dir.join(MANIFEST_NAME)).await?;
    Ok(())
}

/// Count of contiguous published segments starting at index 0. Temp files
/// still being written do not match the segment name pattern and are never
/// counted.
fn scan_ready_count(dir: &Path) -> u32 {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut indices: Vec<u32> = read_dir
        .flatten()
        .filter_map(|e| {
            e.file_name()
                .to_str()
                .and_then(playlist::parse_segment_name)
        })
        .collect();
    indices.sort_unstable();

    let mut ready = 0u32;
    for index in indices {
        if index == ready {
            ready += 1;
        } else if index > ready {
            break;
        }
    }
    ready
}

/// Remove leftover temp files from an interrupted encode. Published
/// segments are kept: they are valid, immutable, and a replacement job
/// re-produces only what is missing.
fn remove_unpublished_tail(dir: &Path) {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    for file in read_dir.flatten() {
        let name = file.file_name();
        if name.to_string_lossy().ends_with(".tmp") {
            if let Err(e) = std::fs::remove_file(file.path()) {
                warn!(file = %file.path().display(), error = %e, "failed to remove temp file");
            }
        }
    }
}
