use std::path::PathBuf;

use tokio::sync::watch;

use crate::preset::Quality;

/// A transcode job is identified by the media it reads and the tier it
/// produces; at most one job exists per key at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub media_id: String,
    pub quality: Quality,
}

impl JobKey {
    pub fn new(media_id: &str, quality: Quality) -> Self {
        Self {
            media_id: media_id.to_string(),
            quality,
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.media_id, self.quality)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Complete,
    Failed,
}

/// Snapshot of a job published to waiters through its watch channel.
#[derive(Debug, Clone, Copy)]
pub struct JobProgress {
    pub state: JobState,
    /// Count of contiguous ready segments: indices `0..ready` are servable.
    pub ready: u32,
}

/// Live job record held in the engine's table. The watch sender is the only
/// publication point, so readiness is monotonic by construction.
pub(crate) struct JobEntry {
    pub key: JobKey,
    pub source: PathBuf,
    pub dir: PathBuf,
    progress: watch::Sender<JobProgress>,
}

impl JobEntry {
    pub fn new(key: JobKey, source: PathBuf, dir: PathBuf) -> Self {
        let (progress, _) = watch::channel(JobProgress {
            state: JobState::Queued,
            ready: 0,
        });
        Self {
            key,
            source,
            dir,
            progress,
        }
    }

    pub fn snapshot(&self) -> JobProgress {
        *self.progress.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobProgress> {
        self.progress.subscribe()
    }

    pub fn set_state(&self, state: JobState) {
        self.progress.send_modify(|p| p.state = state);
    }

    /// Advance the ready watermark. Regressions are ignored; segment
    /// readiness never goes backwards while a job is alive.
    pub fn set_ready(&self, ready: u32) {
        self.progress.send_modify(|p| {
            if ready > p.ready {
                p.ready = ready;
            }
        });
    }
}
