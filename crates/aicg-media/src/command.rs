//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use aicg_models::MAX_ERROR_MESSAGE_BYTES;

use crate::error::{MediaError, MediaResult};
use crate::progress::{parse_progress_line, FfmpegProgress};

/// One input file with its pre-`-i` arguments.
#[derive(Debug, Clone)]
pub struct FfmpegInput {
    args: Vec<String>,
    path: PathBuf,
}

/// Builder for FFmpeg commands.
///
/// Supports multiple inputs (concat and mixing need them); output
/// arguments apply after the last input.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<FfmpegInput>,
    output: PathBuf,
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add a plain input file.
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with_args::<String, _>([], path)
    }

    /// Add an input with arguments placed before its `-i` (e.g. `-loop 1`,
    /// `-stream_loop -1`).
    pub fn input_with_args<S, I>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(FfmpegInput {
            args: args.into_iter().map(Into::into).collect(),
            path: path.as_ref().to_path_buf(),
        });
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    pub fn duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{seconds:.3}"))
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the argument vector.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output on stderr, interleaved with error lines.
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());
        args.push("-nostats".to_string());

        for input in &self.inputs {
            args.extend(input.args.clone());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().to_string());
        }

        args.extend(self.output_args.clone());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner with progress tracking, cancellation and timeout.
#[derive(Clone, Default)]
pub struct FfmpegRunner {
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout_secs: Option<u64>,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cancellation signal; the process is killed when it flips.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run with a progress callback.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        progress_callback: F,
    ) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        let ffmpeg = ffmpeg_path()?;
        let args = cmd.build_args();
        debug!("running {} {}", ffmpeg.display(), args.join(" "));

        let mut child = Command::new(&ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = child.stderr.take().expect("stderr not captured");
        let mut reader = BufReader::new(stderr).lines();

        // Progress keys go to the callback; everything else is kept as the
        // error tail, capped at the operator-visible limit.
        let stderr_task = tokio::spawn(async move {
            let mut current = FfmpegProgress::default();
            let mut error_tail = String::new();

            while let Ok(Some(line)) = reader.next_line().await {
                if let Some(progress) = parse_progress_line(&line, &mut current) {
                    progress_callback(progress);
                } else if !line.contains('=') {
                    error_tail.push_str(&line);
                    error_tail.push('\n');
                    if error_tail.len() > MAX_ERROR_MESSAGE_BYTES * 2 {
                        let cut = error_tail.len() - MAX_ERROR_MESSAGE_BYTES;
                        let mut boundary = cut;
                        while !error_tail.is_char_boundary(boundary) {
                            boundary += 1;
                        }
                        error_tail.drain(..boundary);
                    }
                }
            }
            error_tail
        });

        let wait_result = self.wait_for_completion(&mut child).await;
        let error_tail = stderr_task.await.unwrap_or_default();

        match wait_result {
            Ok(()) => Ok(()),
            Err(MediaError::FfmpegFailed {
                message,
                exit_code,
                ..
            }) => Err(MediaError::ffmpeg_failed(
                message,
                Some(error_tail),
                exit_code,
            )),
            Err(other) => Err(other),
        }
    }

    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<()> {
        let mut cancel_rx = self.cancel_rx.clone();

        let cancelled = async {
            match cancel_rx.as_mut() {
                Some(rx) => {
                    // Already-flagged or flips later; either way kill.
                    while !*rx.borrow() {
                        if rx.changed().await.is_err() {
                            std::future::pending::<()>().await;
                        }
                    }
                }
                None => std::future::pending().await,
            }
        };

        let deadline = async {
            match self.timeout_secs {
                Some(secs) => tokio::time::sleep(std::time::Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancelled => {
                info!("FFmpeg cancelled, killing process");
                let _ = child.kill().await;
                return Err(MediaError::Cancelled);
            }
            _ = deadline => {
                let secs = self.timeout_secs.unwrap_or_default();
                warn!("FFmpeg timed out after {secs}s, killing process");
                let _ = child.kill().await;
                return Err(MediaError::Timeout(secs));
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                None,
                status.code(),
            ))
        }
    }
}

/// Locate the FFmpeg binary, honoring `FFMPEG_PATH`.
pub fn ffmpeg_path() -> MediaResult<PathBuf> {
    if let Ok(path) = std::env::var("FFMPEG_PATH") {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
        return Err(MediaError::FfmpegNotFound);
    }
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Locate the ffprobe binary, honoring `FFPROBE_PATH`.
pub fn ffprobe_path() -> MediaResult<PathBuf> {
    if let Ok(path) = std::env::var("FFPROBE_PATH") {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
        return Err(MediaError::FfprobeNotFound);
    }
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_multi_input_args_in_order() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input("a.mp4")
            .input_with_args(["-stream_loop", "-1"], "bgm.mp3")
            .filter_complex("[0:a][1:a]amix=inputs=2[aout]")
            .map("0:v")
            .map("[aout]")
            .video_codec("copy");

        let args = cmd.build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-i a.mp4"));
        assert!(joined.contains("-stream_loop -1 -i bgm.mp3"));
        assert!(joined.contains("-filter_complex"));
        assert!(joined.ends_with("out.mp4"));

        // stream_loop must precede its input, not the first one
        let loop_pos = args.iter().position(|a| a == "-stream_loop").unwrap();
        let first_input = args.iter().position(|a| a == "a.mp4").unwrap();
        assert!(loop_pos > first_input);
    }

    #[test]
    fn encode_args_present() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input("in.mp4")
            .video_codec("libx264")
            .crf(18)
            .preset("medium")
            .duration(14.5);
        let args = cmd.build_args();
        assert!(args.contains(&"-crf".to_string()));
        assert!(args.contains(&"18".to_string()));
        assert!(args.contains(&"14.500".to_string()));
    }
}
