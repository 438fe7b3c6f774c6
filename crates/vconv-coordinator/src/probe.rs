//! Media probe port and the default ffprobe binding.
//!
//! The scanner only needs codec, bitrate, resolution and frame rate; the
//! probe is a seam so tests can supply canned results.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

use vconv_models::MediaInfo;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to spawn probe: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("probe exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("unparseable probe output: {0}")]
    Parse(String),

    #[error("no video stream in {0}")]
    NoVideoStream(String),
}

/// Extracts stream facts from a source file.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError>;
}

/// Shells out to `ffprobe` with JSON output.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    binary: PathBuf,
}

impl FfprobeProbe {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffprobe"),
        }
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        let output = Command::new(&self.binary)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_ffprobe_output(&String::from_utf8_lossy(&output.stdout), path)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<i32>,
    height: Option<i32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    bit_rate: Option<String>,
}

/// Parse `num/den` frame-rate notation; `0/0` means unknown.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

fn parse_ffprobe_output(json: &str, path: &Path) -> Result<MediaInfo, ProbeError> {
    let parsed: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ProbeError::NoVideoStream(path.display().to_string()))?;

    let codec = stream
        .codec_name
        .clone()
        .ok_or_else(|| ProbeError::Parse("video stream has no codec_name".into()))?;
    let width = stream
        .width
        .ok_or_else(|| ProbeError::Parse("video stream has no width".into()))?;
    let height = stream
        .height
        .ok_or_else(|| ProbeError::Parse("video stream has no height".into()))?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .ok_or_else(|| ProbeError::Parse("video stream has no frame rate".into()))?;

    // Stream bitrate when present, container bitrate otherwise
    let bit_rate: i64 = stream
        .bit_rate
        .as_deref()
        .or(parsed.format.as_ref().and_then(|f| f.bit_rate.as_deref()))
        .and_then(|b| b.parse().ok())
        .ok_or_else(|| ProbeError::Parse("no bitrate reported".into()))?;

    Ok(MediaInfo {
        codec,
        bitrate_kbps: (bit_rate / 1000) as i32,
        width,
        height,
        fps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {
                "codec_type": "audio",
                "codec_name": "aac",
                "bit_rate": "128000"
            },
            {
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1920,
                "height": 1080,
                "avg_frame_rate": "30000/1001",
                "r_frame_rate": "30000/1001",
                "bit_rate": "7992000"
            }
        ],
        "format": {
            "bit_rate": "8120000"
        }
    }"#;

    #[test]
    fn test_parse_sample_output() {
        let info = parse_ffprobe_output(SAMPLE, Path::new("/movies/a.mp4")).unwrap();
        assert_eq!(info.codec, "h264");
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert_eq!(info.bitrate_kbps, 7992);
        assert!((info.fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_falls_back_to_container_bitrate() {
        let json = r#"{
            "streams": [{
                "codec_type": "video",
                "codec_name": "hevc",
                "width": 3840,
                "height": 2160,
                "avg_frame_rate": "60/1"
            }],
            "format": {"bit_rate": "18000000"}
        }"#;
        let info = parse_ffprobe_output(json, Path::new("/movies/b.mkv")).unwrap();
        assert_eq!(info.bitrate_kbps, 18_000);
        assert_eq!(info.fps, 60.0);
    }

    #[test]
    fn test_no_video_stream() {
        let json = r#"{"streams": [{"codec_type": "audio", "codec_name": "mp3"}]}"#;
        assert!(matches!(
            parse_ffprobe_output(json, Path::new("/music/c.mp4")),
            Err(ProbeError::NoVideoStream(_))
        ));
    }

    #[test]
    fn test_frame_rate_parsing() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("garbage"), None);
        assert!((parse_frame_rate("24000/1001").unwrap() - 23.976).abs() < 0.001);
    }

    #[test]
    fn test_garbage_json_is_parse_error() {
        assert!(matches!(
            parse_ffprobe_output("not json", Path::new("/x.mp4")),
            Err(ProbeError::Parse(_))
        ));
    }
}
