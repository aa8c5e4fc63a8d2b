//! FFmpeg-driven video assembly.
//!
//! Command builder/runner with progress parsing and cancellation,
//! ffprobe probing, bounded download fan-in, filter-graph builders
//! (overlap-trim concat, ken-burns, BGM ducking, subtitle burn-in) and
//! the assembler that drives a whole chapter to one finished file.

pub mod assembly;
pub mod command;
pub mod download;
pub mod error;
pub mod filters;
pub mod probe;
pub mod progress;
pub mod scratch;
pub mod srt;

pub use assembly::{
    Assembler, AssemblyOutput, AssemblyStep, BgmTrack, OutputSettings, SentenceClip,
};
pub use command::{ffmpeg_path, ffprobe_path, FfmpegCommand, FfmpegRunner};
pub use download::{download_all, DownloadItem, DEFAULT_DOWNLOAD_PARALLELISM};
pub use error::{MediaError, MediaResult};
pub use filters::{majority_fps, trim_frames};
pub use probe::{parse_frame_rate, probe_audio_duration_ms, probe_clip, ClipProbe};
pub use scratch::ScratchDir;
pub use srt::{build_srt, format_timestamp, SubtitleCue};
