//! FFmpeg progress reporting.

/// Progress parsed from FFmpeg's `-progress` output.
#[derive(Debug, Clone, Default)]
pub struct FfmpegProgress {
    /// Output timestamp in milliseconds.
    pub out_time_ms: i64,
    /// Output timestamp as `HH:MM:SS.micros`.
    pub out_time: String,
    /// Frames written.
    pub frame: u64,
    /// Encoding speed in frames per second.
    pub fps: f64,
    /// Realtime speed multiplier.
    pub speed: f64,
    /// Whether the run reported `progress=end`.
    pub is_complete: bool,
}

/// Parse one line of `-progress` output, returning a snapshot when the
/// line closes a progress block.
pub fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        match key {
            "out_time_ms" | "out_time_us" => {
                // Despite the name, ffmpeg emits microseconds for both.
                if let Ok(us) = value.parse::<i64>() {
                    current.out_time_ms = us / 1000;
                }
            }
            "out_time" => {
                current.out_time = value.to_string();
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    current.fps = fps;
                }
            }
            "speed" => {
                if value != "N/A" {
                    if let Some(speed_str) = value.strip_suffix('x') {
                        if let Ok(speed) = speed_str.parse() {
                            current.speed = speed;
                        }
                    }
                }
            }
            "progress" => {
                if value == "end" {
                    current.is_complete = true;
                }
                return Some(current.clone());
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_progress_block() {
        let mut progress = FfmpegProgress::default();

        parse_progress_line("frame=120", &mut progress);
        parse_progress_line("out_time_us=5000000", &mut progress);
        parse_progress_line("speed=1.5x", &mut progress);
        assert_eq!(progress.frame, 120);
        assert_eq!(progress.out_time_ms, 5000);
        assert!((progress.speed - 1.5).abs() < 0.01);

        let snapshot = parse_progress_line("progress=continue", &mut progress);
        assert!(snapshot.is_some());
        assert!(!snapshot.unwrap().is_complete);

        let done = parse_progress_line("progress=end", &mut progress);
        assert!(done.unwrap().is_complete);
    }

    #[test]
    fn ignores_unknown_keys() {
        let mut progress = FfmpegProgress::default();
        assert!(parse_progress_line("bitrate=1200.3kbits/s", &mut progress).is_none());
        assert!(parse_progress_line("garbage line", &mut progress).is_none());
    }
}
