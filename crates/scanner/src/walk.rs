use std::path::{Path, PathBuf};

use tracing::{debug, warn};

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mkv", "webm", "avi", "mov", "wmv", "mpg", "mpeg", "ts", "flv",
];

/// Whether a filename looks like a video file we should catalog.
pub fn is_video_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.as_str()))
}

/// Entry discovered during a filesystem walk.
#[derive(Debug, Clone)]
pub struct MediaEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mtime_ts: i64,
}

/// Walk a directory recursively and collect video files, skipping hidden
/// entries and known junk directories.
pub fn walk_media_dir(root: &Path) -> Vec<MediaEntry> {
    let mut entries = Vec::new();
    walk_recursive(root, &mut entries);
    entries
}

fn walk_recursive(dir: &Path, entries: &mut Vec<MediaEntry>) {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "cannot read directory");
            return;
        }
    };

    for entry in read_dir.flatten() {
        let path = entry.path();
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        if name.starts_with('.') {
            debug!(path = %path.display(), "skipping hidden entry");
            continue;
        }

        if path.is_dir() {
            if name == "@eaDir" || name == "#recycle" || name == "lost+found" {
                continue;
            }
            walk_recursive(&path, entries);
        } else if is_video_file(&name) {
            let metadata = match std::fs::metadata(&path) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            entries.push(MediaEntry {
                path,
                size_bytes: metadata.len(),
                mtime_ts: mtime,
            });
        }
    }
}
