//! Engine behavior under a fake backend that publishes segments on a
//! controlled schedule, mirroring how ffmpeg lands segments on disk
//! (temp write, then rename).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use kinema_hls::backend::{BackendExit, EncodeSpec, TranscodeBackend, TranscodeHandle};
use kinema_hls::engine::HlsEngine;
use kinema_hls::playlist;
use kinema_hls::preset::Quality;
use kinema_hls::{HlsConfig, HlsError};

#[derive(Clone, Copy)]
enum Outcome {
    Complete,
    Fail,
    /// Keep the process "alive" forever so the stall timeout has to fire.
    Hang,
}

#[derive(Clone, Copy)]
struct Script {
    segments: u32,
    step_ms: u64,
    outcome: Outcome,
}

/// Fake encoder: each `start` consumes the next script and publishes that
/// many segments, one per step, before reporting its outcome.
struct FakeBackend {
    scripts: Vec<Script>,
    starts: AtomicUsize,
}

impl FakeBackend {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts,
            starts: AtomicUsize::new(0),
        })
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl TranscodeBackend for FakeBackend {
    fn start(&self, spec: &EncodeSpec) -> Result<Box<dyn TranscodeHandle>, HlsError> {
        let n = self.starts.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts[n.min(self.scripts.len() - 1)];

        let exit: Arc<StdMutex<Option<BackendExit>>> = Arc::new(StdMutex::new(None));
        let alive = Arc::new(AtomicBool::new(true));

        tokio::spawn(publish_segments(
            spec.out_dir.clone(),
            script,
            exit.clone(),
            alive.clone(),
        ));

        Ok(Box::new(FakeHandle { exit, alive }))
    }
}

async fn publish_segments(
    dir: PathBuf,
    script: Script,
    exit: Arc<StdMutex<Option<BackendExit>>>,
    alive: Arc<AtomicBool>,
) {
    for index in 0..script.segments {
        tokio::time::sleep(Duration::from_millis(script.step_ms)).await;
        if !alive.load(Ordering::SeqCst) {
            return;
        }
        let tmp = dir.join(format!("segment-{index:03}.ts.tmp"));
        std::fs::write(&tmp, segment_bytes(index)).unwrap();
        std::fs::rename(&tmp, dir.join(playlist::segment_file_name(index))).unwrap();
    }

    match script.outcome {
        Outcome::Complete => *exit.lock().unwrap() = Some(BackendExit::Completed),
        Outcome::Fail => *exit.lock().unwrap() = Some(BackendExit::Failed(Some(1))),
        Outcome::Hang => {}
    }
}

struct FakeHandle {
    exit: Arc<StdMutex<Option<BackendExit>>>,
    alive: Arc<AtomicBool>,
}

impl TranscodeHandle for FakeHandle {
    fn try_status(&mut self) -> Result<Option<BackendExit>, HlsError> {
        Ok(*self.exit.lock().unwrap())
    }

    fn kill(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

fn segment_bytes(index: u32) -> Vec<u8> {
    format!("ts-payload-{index}").into_bytes()
}

fn test_engine(
    cache_root: &Path,
    backend: Arc<FakeBackend>,
    max_concurrent_jobs: usize,
) -> Arc<HlsEngine> {
    Arc::new(HlsEngine::with_backend(
        HlsConfig {
            cache_root: cache_root.to_path_buf(),
            max_concurrent_jobs,
            stall_timeout: Duration::from_millis(300),
            segment_wait_timeout: Duration::from_millis(3000),
            poll_interval: Duration::from_millis(15),
            ..HlsConfig::default()
        },
        backend,
    ))
}

async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn source() -> PathBuf {
    PathBuf::from("/media/example.mkv")
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_starts_share_one_job() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new(vec![Script {
        segments: 3,
        step_ms: 30,
        outcome: Outcome::Complete,
    }]);
    let engine = test_engine(root.path(), backend.clone(), 4);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .start_hls_generation(&source(), "m1", Quality::High)
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap());
    }
    assert_eq!(backend.starts(), 1);

    assert!(
        wait_until(
            || engine.has_hls_cache("m1", Quality::High),
            Duration::from_secs(3)
        )
        .await
    );
    assert!(!engine.is_hls_generating("m1", Quality::High).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn readiness_is_monotonic_and_gap_free() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new(vec![Script {
        segments: 5,
        step_ms: 40,
        outcome: Outcome::Complete,
    }]);
    let engine = test_engine(root.path(), backend, 1);

    assert!(
        engine
            .start_hls_generation(&source(), "m1", Quality::Medium)
            .await
    );

    let mut last_ready = 0u32;
    while let Some(progress) = engine.job_progress("m1", Quality::Medium).await {
        assert!(progress.ready >= last_ready, "readiness went backwards");
        // No gaps: everything below the watermark is servable.
        for index in 0..progress.ready {
            let name = playlist::segment_file_name(index);
            assert!(
                engine
                    .get_hls_segment("m1", Quality::Medium, &name)
                    .await
                    .is_some()
            );
        }
        last_ready = progress.ready;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(engine.has_hls_cache("m1", Quality::Medium));
}

#[tokio::test(flavor = "multi_thread")]
async fn segments_not_served_before_ready_and_stable_after() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new(vec![Script {
        segments: 4,
        step_ms: 50,
        outcome: Outcome::Complete,
    }]);
    let engine = test_engine(root.path(), backend, 1);

    assert!(
        engine
            .start_hls_generation(&source(), "m1", Quality::Low)
            .await
    );
    // Nothing has been published yet.
    assert!(
        engine
            .get_hls_segment("m1", Quality::Low, "segment-002.ts")
            .await
            .is_none()
    );

    assert!(
        engine
            .request_hls_segment(&source(), "m1", Quality::Low, 2)
            .await
    );
    let first = engine
        .get_hls_segment("m1", Quality::Low, "segment-002.ts")
        .await
        .expect("segment ready after request");
    assert_eq!(first, segment_bytes(2));

    // Idempotent re-read yields identical bytes.
    let second = engine
        .get_hls_segment("m1", Quality::Low, "segment-002.ts")
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread")]
async fn admission_bound_rejects_excess_jobs() {
    let root = tempfile::tempdir().unwrap();
    // Two hanging jobs saturate the scheduler; the third script completes.
    let backend = FakeBackend::new(vec![
        Script {
            segments: 0,
            step_ms: 10,
            outcome: Outcome::Hang,
        },
        Script {
            segments: 0,
            step_ms: 10,
            outcome: Outcome::Hang,
        },
        Script {
            segments: 1,
            step_ms: 10,
            outcome: Outcome::Complete,
        },
    ]);
    let engine = test_engine(root.path(), backend, 2);

    assert!(
        engine
            .start_hls_generation(&source(), "m1", Quality::High)
            .await
    );
    assert!(
        engine
            .start_hls_generation(&source(), "m2", Quality::High)
            .await
    );
    // Saturated: a third distinct key is refused, not queued.
    assert!(
        !engine
            .start_hls_generation(&source(), "m3", Quality::High)
            .await
    );
    // Attaching to an existing key still succeeds while saturated.
    assert!(
        engine
            .start_hls_generation(&source(), "m2", Quality::High)
            .await
    );

    // The hanging jobs trip the stall timeout and release their slots.
    let freed = {
        let engine = engine.clone();
        wait_until_async(
            move || {
                let engine = engine.clone();
                async move {
                    !engine.is_hls_generating("m1", Quality::High).await
                        && !engine.is_hls_generating("m2", Quality::High).await
                }
            },
            Duration::from_secs(2),
        )
        .await
    };
    assert!(freed, "stalled jobs never released their slots");

    assert!(
        engine
            .start_hls_generation(&source(), "m3", Quality::High)
            .await
    );
}

async fn wait_until_async<F, Fut>(cond: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond().await
}

#[tokio::test(flavor = "multi_thread")]
async fn stalled_job_fails_and_keeps_ready_segments() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new(vec![Script {
        segments: 2,
        step_ms: 30,
        outcome: Outcome::Hang,
    }]);
    let engine = test_engine(root.path(), backend, 1);

    // Segment 5 never arrives; the stall timeout resolves the wait.
    assert!(
        !engine
            .request_hls_segment(&source(), "m1", Quality::High, 5)
            .await
    );

    // The coordinator clears the job once the stall is detected.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!engine.is_hls_generating("m1", Quality::High).await);

    // Already-published segments survive the failure.
    let dir = root.path().join("m1").join("high");
    assert!(dir.join("segment-000.ts").is_file());
    assert!(dir.join("segment-001.ts").is_file());
    // But the key is not treated as a complete cache.
    assert!(!engine.has_hls_cache("m1", Quality::High));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_job_is_replaced_on_next_request() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new(vec![
        Script {
            segments: 1,
            step_ms: 20,
            outcome: Outcome::Fail,
        },
        Script {
            segments: 4,
            step_ms: 20,
            outcome: Outcome::Complete,
        },
    ]);
    let engine = test_engine(root.path(), backend.clone(), 2);

    assert!(
        !engine
            .request_hls_segment(&source(), "m1", Quality::Medium, 3)
            .await
    );

    // Give the failed coordinator a moment to clear its slot.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(
        engine
            .request_hls_segment(&source(), "m1", Quality::Medium, 3)
            .await
    );
    assert_eq!(backend.starts(), 2);
    assert!(
        wait_until(
            || engine.has_hls_cache("m1", Quality::Medium),
            Duration::from_secs(2)
        )
        .await
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn pregenerate_waits_for_the_head_of_the_stream() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new(vec![Script {
        segments: 4,
        step_ms: 25,
        outcome: Outcome::Complete,
    }]);
    let engine = test_engine(root.path(), backend, 1);

    assert!(
        engine
            .pregenerate_initial_segments(&source(), "m1", Quality::High, 3)
            .await
    );
    let dir = root.path().join("m1").join("high");
    for index in 0..3 {
        assert!(dir.join(playlist::segment_file_name(index)).is_file());
    }

    // Zero segments requested is trivially satisfied.
    assert!(
        engine
            .pregenerate_initial_segments(&source(), "m1", Quality::High, 0)
            .await
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_segment_names_are_never_served() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new(vec![Script {
        segments: 2,
        step_ms: 15,
        outcome: Outcome::Complete,
    }]);
    let engine = test_engine(root.path(), backend, 1);

    assert!(
        engine
            .request_hls_segment(&source(), "m1", Quality::High, 1)
            .await
    );

    assert!(
        engine
            .get_hls_segment("m1", Quality::High, "segment-000.ts")
            .await
            .is_some()
    );
    for bad in ["../../etc/passwd.ts", "segment-99.ts", "segment-0000.ts"] {
        assert!(
            engine.get_hls_segment("m1", Quality::High, bad).await.is_none(),
            "{bad} must not be served"
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn playlist_progresses_from_absent_to_partial_to_complete() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new(vec![Script {
        segments: 3,
        step_ms: 60,
        outcome: Outcome::Complete,
    }]);
    let engine = test_engine(root.path(), backend, 1);

    // Not started: absent.
    assert!(engine.get_hls_playlist("m1", Quality::High).await.is_none());

    assert!(
        engine
            .start_hls_generation(&source(), "m1", Quality::High)
            .await
    );

    // While running: grows, no end marker.
    assert!(
        engine
            .request_hls_segment(&source(), "m1", Quality::High, 0)
            .await
    );
    let partial = engine
        .get_hls_playlist("m1", Quality::High)
        .await
        .expect("job exists");
    if !playlist::is_complete(&partial) {
        assert!(partial.contains("segment-000.ts"));
    }

    assert!(
        wait_until(
            || engine.has_hls_cache("m1", Quality::High),
            Duration::from_secs(3)
        )
        .await
    );
    let complete = engine.get_hls_playlist("m1", Quality::High).await.unwrap();
    assert!(playlist::is_complete(&complete));
    assert_eq!(complete.matches("#EXTINF").count(), 3);
}

#[tokio::test]
async fn vod_playlist_matches_duration_math() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new(vec![Script {
        segments: 0,
        step_ms: 1,
        outcome: Outcome::Complete,
    }]);
    let engine = test_engine(root.path(), backend, 1);

    let text = engine.generate_vod_playlist(Quality::High, 20.0);
    assert_eq!(text.matches("#EXTINF").count(), 4);
    assert!(text.trim_end().ends_with(playlist::END_MARKER));
}
