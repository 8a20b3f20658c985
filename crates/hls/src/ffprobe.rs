use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::HlsError;

/// The slice of ffprobe output the server cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeInfo {
    pub container: String,
    pub duration_secs: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Run ffprobe on a file and parse the JSON output.
pub async fn probe(ffprobe_path: &Path, file: &Path) -> Result<ProbeInfo, HlsError> {
    let output = tokio::process::Command::new(ffprobe_path)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(file)
        .output()
        .await
        .map_err(|e| HlsError::Probe(format!("spawn failed: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HlsError::Probe(stderr.into_owned()));
    }

    let raw: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| HlsError::Probe(format!("parse JSON: {e}")))?;

    parse_probe_output(&raw)
}

fn parse_probe_output(raw: &serde_json::Value) -> Result<ProbeInfo, HlsError> {
    let format = raw
        .get("format")
        .ok_or_else(|| HlsError::Probe("missing 'format'".into()))?;

    let container = format
        .get("format_name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let duration_secs: f64 = format
        .get("duration")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    // First video stream, if any, supplies the dimensions.
    let video = raw
        .get("streams")
        .and_then(|v| v.as_array())
        .and_then(|streams| {
            streams.iter().find(|s| {
                s.get("codec_type").and_then(|v| v.as_str()) == Some("video")
            })
        });

    let width = video
        .and_then(|s| s.get("width"))
        .and_then(|v| v.as_u64())
        .map(|w| w as u32);
    let height = video
        .and_then(|s| s.get("height"))
        .and_then(|v| v.as_u64())
        .map(|h| h as u32);

    Ok(ProbeInfo {
        container,
        duration_secs,
        width,
        height,
    })
}
