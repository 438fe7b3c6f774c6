//! Media probe results.

use serde::{Deserialize, Serialize};

/// Stream facts extracted from a source file by the media probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Codec name (h264, hevc, av1, ...)
    pub codec: String,
    /// Overall bitrate in kbps
    pub bitrate_kbps: i32,
    pub width: i32,
    pub height: i32,
    pub fps: f64,
}

impl MediaInfo {
    pub fn total_pixels(&self) -> i64 {
        i64::from(self.width) * i64::from(self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_pixels() {
        let info = MediaInfo {
            codec: "h264".into(),
            bitrate_kbps: 8_000,
            width: 1920,
            height: 1080,
            fps: 30.0,
        };
        assert_eq!(info.total_pixels(), 2_073_600);
    }
}
