//! Video catalog entries and transcode classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::InvalidCode;

/// Transcode lifecycle state of a cataloged video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "i16", try_from = "i16")]
pub enum TranscodeStatus {
    /// Codec/bitrate already acceptable, never dispatched
    #[default]
    NotNeeded,
    /// Eligible for dispatch
    Wait,
    /// A task exists but has not reported progress yet
    Created,
    /// A task is actively transcoding this video
    Running,
    /// Last task finished successfully
    Completed,
    /// Last task failed; CPU/QSV workers may retry
    Failed,
}

impl TranscodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscodeStatus::NotNeeded => "not_needed",
            TranscodeStatus::Wait => "wait",
            TranscodeStatus::Created => "created",
            TranscodeStatus::Running => "running",
            TranscodeStatus::Completed => "completed",
            TranscodeStatus::Failed => "failed",
        }
    }

    /// States in which the video owns a live task.
    pub fn has_active_task(&self) -> bool {
        matches!(self, TranscodeStatus::Created | TranscodeStatus::Running)
    }
}

impl From<TranscodeStatus> for i16 {
    fn from(status: TranscodeStatus) -> i16 {
        match status {
            TranscodeStatus::NotNeeded => 0,
            TranscodeStatus::Wait => 1,
            TranscodeStatus::Created => 2,
            TranscodeStatus::Running => 3,
            TranscodeStatus::Completed => 4,
            TranscodeStatus::Failed => 5,
        }
    }
}

impl TryFrom<i16> for TranscodeStatus {
    type Error = InvalidCode;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(TranscodeStatus::NotNeeded),
            1 => Ok(TranscodeStatus::Wait),
            2 => Ok(TranscodeStatus::Created),
            3 => Ok(TranscodeStatus::Running),
            4 => Ok(TranscodeStatus::Completed),
            5 => Ok(TranscodeStatus::Failed),
            other => Err(InvalidCode::new("transcode_status", other)),
        }
    }
}

impl std::fmt::Display for TranscodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A cataloged source video, keyed by its canonical path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    /// Internal row id
    pub id: i64,
    /// Canonical separator-prefixed root-relative path
    pub path: String,
    /// Codec name as reported by the probe (h264, hevc, av1, ...)
    pub codec: String,
    /// Overall video bitrate in kbps
    pub bitrate_kbps: i32,
    pub width: i32,
    pub height: i32,
    /// width * height, denormalized for dispatch filtering
    pub total_pixels: i64,
    pub fps: f64,
    /// File size in megabytes
    pub size_mb: f64,
    pub is_vr: bool,
    /// Filesystem mtime at last probe
    pub file_mtime: Option<DateTime<Utc>>,
    /// When the catalog row was last refreshed
    pub updated_at: DateTime<Utc>,
    /// False once a scan no longer finds the file (tombstone)
    pub exists: bool,
    pub transcode_status: TranscodeStatus,
    /// Internal id of the live task, set iff status is Created/Running
    pub current_task_id: Option<i64>,
}

/// Base bitrate target: 3,500 kbps at 1920x1080 @ 30 fps.
const BASE_BITRATE_KBPS: f64 = 3_500.0;
const BASE_PIXELS: f64 = 1920.0 * 1080.0;
const BASE_FPS: f64 = 30.0;
const MIN_TARGET_KBPS: f64 = 2_000.0;
const MAX_TARGET_KBPS: f64 = 25_000.0;

/// Compute the bitrate target for an already-efficient codec.
///
/// Scales the 1080p30 base linearly with pixel count and frame rate,
/// clamped to [2,000, 25,000] kbps.
pub fn target_bitrate_kbps(width: i32, height: i32, fps: f64) -> i32 {
    let pixels = f64::from(width) * f64::from(height);
    let target = BASE_BITRATE_KBPS * (pixels / BASE_PIXELS) * (fps / BASE_FPS);
    target.clamp(MIN_TARGET_KBPS, MAX_TARGET_KBPS) as i32
}

/// Classify a probed video into its initial transcode status.
///
/// - h264 always waits for transcoding.
/// - hevc/av1 VR videos are left alone.
/// - hevc/av1 non-VR videos wait only when their bitrate is at or above
///   the scaled target.
/// - Anything else is left alone.
pub fn classify(
    codec: &str,
    bitrate_kbps: i32,
    width: i32,
    height: i32,
    fps: f64,
    is_vr: bool,
) -> TranscodeStatus {
    match codec {
        "h264" => TranscodeStatus::Wait,
        "hevc" | "av1" => {
            if is_vr {
                return TranscodeStatus::NotNeeded;
            }
            if bitrate_kbps >= target_bitrate_kbps(width, height, fps) {
                TranscodeStatus::Wait
            } else {
                TranscodeStatus::NotNeeded
            }
        }
        _ => TranscodeStatus::NotNeeded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for code in 0..=5 {
            let status = TranscodeStatus::try_from(code).unwrap();
            assert_eq!(i16::from(status), code);
        }
        assert!(TranscodeStatus::try_from(6).is_err());
    }

    #[test]
    fn test_target_at_base_resolution() {
        assert_eq!(target_bitrate_kbps(1920, 1080, 30.0), 3_500);
    }

    #[test]
    fn test_target_clamps_high() {
        // 4x pixels, 2x fps: 3500 * 8 = 28000, clamped to 25000
        assert_eq!(target_bitrate_kbps(3840, 2160, 60.0), 25_000);
    }

    #[test]
    fn test_target_clamps_low() {
        assert_eq!(target_bitrate_kbps(640, 360, 24.0), 2_000);
    }

    #[test]
    fn test_h264_always_waits() {
        assert_eq!(
            classify("h264", 800, 1280, 720, 24.0, false),
            TranscodeStatus::Wait
        );
        assert_eq!(
            classify("h264", 80_000, 3840, 2160, 60.0, true),
            TranscodeStatus::Wait
        );
    }

    #[test]
    fn test_hevc_4k60_under_target_not_needed() {
        // target = min(3500 * 4 * 2, 25000) = 25000; 18000 < 25000
        assert_eq!(
            classify("hevc", 18_000, 3840, 2160, 60.0, false),
            TranscodeStatus::NotNeeded
        );
    }

    #[test]
    fn test_hevc_1080p30_over_target_waits() {
        // target = 3500; 5000 >= 3500
        assert_eq!(
            classify("hevc", 5_000, 1920, 1080, 30.0, false),
            TranscodeStatus::Wait
        );
    }

    #[test]
    fn test_hevc_vr_not_needed() {
        assert_eq!(
            classify("hevc", 60_000, 5760, 2880, 60.0, true),
            TranscodeStatus::NotNeeded
        );
    }

    #[test]
    fn test_unknown_codec_not_needed() {
        assert_eq!(
            classify("vp9", 9_000, 1920, 1080, 30.0, false),
            TranscodeStatus::NotNeeded
        );
    }
}
