use std::fmt::Write;
use std::sync::LazyLock;

use regex::Regex;

use crate::preset::expected_segment_count;

/// Content-Type for HLS playlists.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Content-Type for MPEG-TS segments.
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// Marker that closes a finished VOD playlist.
pub const END_MARKER: &str = "#EXT-X-ENDLIST";

static SEGMENT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^segment-(\d{3})\.ts$").expect("segment name pattern"));

/// Canonical on-disk/URI name for a segment index.
pub fn segment_file_name(index: u32) -> String {
    format!("segment-{index:03}.ts")
}

/// Parse a client-supplied segment name. Anything that is not exactly
/// `segment-DDD.ts` is rejected here, before any job or file lookup.
pub fn parse_segment_name(name: &str) -> Option<u32> {
    let caps = SEGMENT_NAME_RE.captures(name)?;
    caps[1].parse().ok()
}

fn header(segment_secs: u32) -> String {
    format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:{segment_secs}\n#EXT-X-MEDIA-SEQUENCE:0\n"
    )
}

/// Full VOD playlist for a source of known duration. Every segment the
/// encode will eventually produce is listed up front; the player resolves
/// each URI lazily through the segment endpoint.
pub fn vod_playlist(segment_secs: u32, duration_secs: f64) -> String {
    let count = expected_segment_count(duration_secs, segment_secs);
    let mut out = header(segment_secs);
    out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
    for index in 0..count {
        let elapsed = index as f64 * segment_secs as f64;
        let extinf = (duration_secs - elapsed).min(segment_secs as f64);
        let _ = writeln!(out, "#EXTINF:{extinf:.3},");
        let _ = writeln!(out, "{}", segment_file_name(index));
    }
    out.push_str(END_MARKER);
    out.push('\n');
    out
}

/// Complete playlist rendered from the final segment count when the exact
/// source duration is not known; entries carry the nominal segment length.
pub fn complete_playlist(segment_secs: u32, segment_count: u32) -> String {
    let mut out = header(segment_secs);
    out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
    for index in 0..segment_count {
        let _ = writeln!(out, "#EXTINF:{segment_secs}.000,");
        let _ = writeln!(out, "{}", segment_file_name(index));
    }
    out.push_str(END_MARKER);
    out.push('\n');
    out
}

/// Growing playlist listing only the segments ready so far. No end marker:
/// the client keeps reloading until the job completes.
pub fn partial_playlist(segment_secs: u32, ready: u32) -> String {
    let mut out = header(segment_secs);
    for index in 0..ready {
        let _ = writeln!(out, "#EXTINF:{segment_secs}.000,");
        let _ = writeln!(out, "{}", segment_file_name(index));
    }
    out
}

/// Header-only body handed out before generation has produced anything.
pub fn empty_playlist(segment_secs: u32) -> String {
    header(segment_secs)
}

/// Whether a playlist body is final (carries the end marker).
pub fn is_complete(text: &str) -> bool {
    text.contains(END_MARKER)
}
