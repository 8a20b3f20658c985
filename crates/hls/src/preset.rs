use serde::{Deserialize, Serialize};

/// Named quality tier requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    High,
    Medium,
    Low,
}

impl Quality {
    pub const ALL: [Quality; 3] = [Quality::High, Quality::Medium, Quality::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn preset(self) -> QualityPreset {
        match self {
            Self::High => HIGH,
            Self::Medium => MEDIUM,
            Self::Low => LOW,
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode parameters for one quality tier. Pure data; the table below is the
/// only source of these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPreset {
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub segment_secs: u32,
}

const HIGH: QualityPreset = QualityPreset {
    width: 1920,
    height: 1080,
    video_bitrate_kbps: 5000,
    audio_bitrate_kbps: 192,
    segment_secs: 6,
};

const MEDIUM: QualityPreset = QualityPreset {
    width: 1280,
    height: 720,
    video_bitrate_kbps: 2500,
    audio_bitrate_kbps: 128,
    segment_secs: 6,
};

const LOW: QualityPreset = QualityPreset {
    width: 854,
    height: 480,
    video_bitrate_kbps: 1000,
    audio_bitrate_kbps: 96,
    segment_secs: 6,
};

/// Number of segments a source of the given duration splits into (ceiling
/// division; a trailing partial segment still counts).
pub fn expected_segment_count(duration_secs: f64, segment_secs: u32) -> u32 {
    if duration_secs <= 0.0 || segment_secs == 0 {
        return 0;
    }
    (duration_secs / segment_secs as f64).ceil() as u32
}
