//! Media probing via ffprobe.

use std::path::Path;
use std::process::Stdio;

use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::command::ffprobe_path;
use crate::error::{MediaError, MediaResult};

/// Probed facts about one clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipProbe {
    /// Container duration in seconds.
    pub duration_s: f64,
    /// Video frame rate (from `r_frame_rate`).
    pub fps: f64,
    /// Whether an audio stream is present.
    pub has_audio: bool,
}

/// Probe a clip for duration, frame rate and audio presence.
pub async fn probe_clip(path: impl AsRef<Path>) -> MediaResult<ClipProbe> {
    let path = path.as_ref();
    let json = run_ffprobe(path).await?;

    let duration_s = json
        .pointer("/format/duration")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| MediaError::FfprobeFailed(format!("no duration for {}", path.display())))?;

    let streams = json
        .pointer("/streams")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut fps = 0.0;
    let mut has_audio = false;
    for stream in &streams {
        match stream.pointer("/codec_type").and_then(Value::as_str) {
            Some("video") => {
                if let Some(rate) = stream.pointer("/r_frame_rate").and_then(Value::as_str) {
                    if let Some(parsed) = parse_frame_rate(rate) {
                        fps = parsed;
                    }
                }
            }
            Some("audio") => has_audio = true,
            _ => {}
        }
    }

    if fps <= 0.0 {
        return Err(MediaError::FfprobeFailed(format!(
            "no video stream in {}",
            path.display()
        )));
    }

    debug!(path = %path.display(), duration_s, fps, has_audio, "probed clip");
    Ok(ClipProbe {
        duration_s,
        fps,
        has_audio,
    })
}

/// Measure the duration of an audio file in milliseconds.
pub async fn probe_audio_duration_ms(path: impl AsRef<Path>) -> MediaResult<u64> {
    let path = path.as_ref();
    let json = run_ffprobe(path).await?;
    let duration_s = json
        .pointer("/format/duration")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| MediaError::FfprobeFailed(format!("no duration for {}", path.display())))?;
    Ok((duration_s * 1000.0).round() as u64)
}

async fn run_ffprobe(path: &Path) -> MediaResult<Value> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    let ffprobe = ffprobe_path()?;

    let output = Command::new(&ffprobe)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaError::FfprobeFailed(
            stderr.lines().last().unwrap_or("unknown error").to_string(),
        ));
    }

    Ok(serde_json::from_slice(&output.stdout)?)
}

/// Parse ffprobe's rational frame rate (`30000/1001`, `24/1`).
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                None
            } else {
                Some(num / den)
            }
        }
        None => rate.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rational_rates() {
        assert_eq!(parse_frame_rate("24/1"), Some(24.0));
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }
}
