//! The video assembly engine.
//!
//! Deterministic assembly of finished media: ordered download fan-in,
//! FFmpeg concat with overlap trimming (movie) or ken-burns rendering and
//! subtitle burn-in (narrative), BGM mixing, all inside a scratch
//! directory that is cleaned whatever happens. Uploading the result and
//! persisting `VideoTask` state belong to the caller.

use std::path::PathBuf;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use aicg_models::VideoTaskStatus;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::download::{download_all, DownloadItem, DEFAULT_DOWNLOAD_PARALLELISM};
use crate::error::{MediaError, MediaResult};
use crate::filters;
use crate::probe::{probe_clip, ClipProbe};
use crate::scratch::ScratchDir;
use crate::srt::{build_srt, SubtitleCue};

/// Re-encode quality for assembled video.
const ASSEMBLY_CRF: u8 = 18;
/// Wall-clock budget per FFmpeg run.
const ENCODE_TIMEOUT_SECS: u64 = 1800;

/// Target output settings.
#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub width: i32,
    pub height: i32,
    pub fps: i32,
    /// Background music to mix in, if any.
    pub bgm: Option<BgmTrack>,
}

/// Background music source.
#[derive(Debug, Clone)]
pub struct BgmTrack {
    pub url: String,
    /// Mix level, already validated to `[0, 0.5]`.
    pub volume: f32,
}

/// One narrative sentence's assembly inputs.
#[derive(Debug, Clone)]
pub struct SentenceClip {
    pub image_url: String,
    pub audio_url: String,
    pub duration_ms: u64,
    pub subtitle_text: String,
}

/// Step notification for progress persistence.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyStep {
    pub status: VideoTaskStatus,
    pub current: u32,
    pub total: u32,
}

/// Finished assembly: the scratch directory keeps the file alive until
/// the caller has uploaded it.
#[derive(Debug)]
pub struct AssemblyOutput {
    pub scratch: ScratchDir,
    pub video_path: PathBuf,
    /// Probed duration of the final file, seconds.
    pub duration_s: f64,
}

/// The assembler.
#[derive(Clone)]
pub struct Assembler {
    http: reqwest::Client,
    max_downloads: usize,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            max_downloads: DEFAULT_DOWNLOAD_PARALLELISM,
        }
    }

    pub fn with_max_downloads(mut self, max: usize) -> Self {
        self.max_downloads = max.max(1);
        self
    }

    fn runner(&self, cancel: &watch::Receiver<bool>) -> FfmpegRunner {
        FfmpegRunner::new()
            .with_cancel(cancel.clone())
            .with_timeout(ENCODE_TIMEOUT_SECS)
    }

    fn check_cancel(cancel: &watch::Receiver<bool>) -> MediaResult<()> {
        if *cancel.borrow() {
            Err(MediaError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(
        events: &mpsc::UnboundedSender<AssemblyStep>,
        status: VideoTaskStatus,
        current: u32,
        total: u32,
    ) {
        let _ = events.send(AssemblyStep {
            status,
            current,
            total,
        });
    }

    /// Assemble ordered transition clips into one movie.
    pub async fn assemble_movie(
        &self,
        settings: &OutputSettings,
        clip_urls: &[String],
        events: mpsc::UnboundedSender<AssemblyStep>,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<AssemblyOutput> {
        if clip_urls.is_empty() {
            return Err(MediaError::invalid_input("no transition clips to assemble"));
        }
        let scratch = ScratchDir::create()?;
        let total = clip_urls.len() as u32;

        // Download fan-in, bounded.
        Self::emit(&events, VideoTaskStatus::Downloading, 0, total);
        let items: Vec<DownloadItem> = clip_urls
            .iter()
            .enumerate()
            .map(|(i, url)| DownloadItem {
                url: url.clone(),
                file_name: format!("clip_{i:03}.mp4"),
            })
            .collect();
        let mut done = 0u32;
        let events_dl = events.clone();
        let clip_paths = download_all(
            &self.http,
            &items,
            scratch.path(),
            self.max_downloads,
            Some(cancel.clone()),
            move |_| {
                done += 1;
                Self::emit(&events_dl, VideoTaskStatus::Downloading, done, total);
            },
        )
        .await?;

        Self::check_cancel(&cancel)?;

        // Probe for the authoritative frame rate.
        let mut probes: Vec<ClipProbe> = Vec::with_capacity(clip_paths.len());
        for path in &clip_paths {
            probes.push(probe_clip(path).await?);
        }
        let fps_values: Vec<f64> = probes.iter().map(|p| p.fps).collect();
        let clip_fps = match filters::majority_fps(&fps_values) {
            Some(fps) => fps as f64,
            None => {
                info!("clip fps vote split, falling back to target fps");
                settings.fps as f64
            }
        };
        let trim = filters::trim_frames(clip_fps);

        // Frame-accurate trim + concat in one graph, CRF 18 re-encode.
        Self::emit(&events, VideoTaskStatus::Concatenating, 0, total);
        let concat_path = scratch.file("concat.mp4");
        let mut cmd = FfmpegCommand::new(&concat_path);
        for path in &clip_paths {
            cmd = cmd.input(path);
        }
        let cmd = cmd
            .filter_complex(filters::movie_concat_filter(
                clip_paths.len(),
                trim,
                clip_fps,
                settings.width,
                settings.height,
                settings.fps,
            ))
            .map("[vout]")
            .map("[aout]")
            .video_codec("libx264")
            .crf(ASSEMBLY_CRF)
            .preset("medium")
            .audio_codec("aac")
            .output_args(["-b:a", "192k", "-r", &settings.fps.to_string()]);
        self.runner(&cancel).run(&cmd).await?;
        Self::emit(&events, VideoTaskStatus::Concatenating, total, total);

        // Optional BGM pass.
        let final_path = self
            .mix_bgm(settings, &scratch, concat_path, &events, &cancel)
            .await?;

        let duration_s = probe_clip(&final_path).await?.duration_s;
        let expected: f64 = probes
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if i == 0 {
                    p.duration_s
                } else {
                    p.duration_s - trim as f64 / clip_fps
                }
            })
            .sum();
        if (duration_s - expected).abs() > 0.1 {
            warn!(
                duration_s,
                expected, "assembled duration deviates from trim arithmetic"
            );
        }

        Ok(AssemblyOutput {
            scratch,
            video_path: final_path,
            duration_s,
        })
    }

    /// Assemble narrative sentences: ken-burns clip per sentence, concat,
    /// subtitle burn-in, BGM.
    pub async fn assemble_narrative(
        &self,
        settings: &OutputSettings,
        sentences: &[SentenceClip],
        events: mpsc::UnboundedSender<AssemblyStep>,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<AssemblyOutput> {
        if sentences.is_empty() {
            return Err(MediaError::invalid_input("no sentences to assemble"));
        }
        let scratch = ScratchDir::create()?;
        let total = sentences.len() as u32;

        // Download images and audio, bounded.
        let mut items = Vec::with_capacity(sentences.len() * 2);
        for (i, sentence) in sentences.iter().enumerate() {
            items.push(DownloadItem {
                url: sentence.image_url.clone(),
                file_name: format!("image_{i:03}.png"),
            });
            items.push(DownloadItem {
                url: sentence.audio_url.clone(),
                file_name: format!("audio_{i:03}.wav"),
            });
        }
        Self::emit(&events, VideoTaskStatus::Downloading, 0, total);
        let mut files_done = 0u32;
        let events_dl = events.clone();
        let paths = download_all(
            &self.http,
            &items,
            scratch.path(),
            self.max_downloads,
            Some(cancel.clone()),
            move |_| {
                files_done += 1;
                Self::emit(
                    &events_dl,
                    VideoTaskStatus::Downloading,
                    files_done / 2,
                    total,
                );
            },
        )
        .await?;

        // Render one ken-burns clip per sentence; clip length equals the
        // measured audio length.
        let mut clip_paths = Vec::with_capacity(sentences.len());
        for (i, sentence) in sentences.iter().enumerate() {
            Self::check_cancel(&cancel)?;
            Self::emit(&events, VideoTaskStatus::Synthesizing, i as u32, total);

            let image = &paths[i * 2];
            let audio = &paths[i * 2 + 1];
            let duration_s = sentence.duration_ms as f64 / 1000.0;
            let frames = (duration_s * settings.fps as f64).ceil() as u32;
            let clip_path = scratch.file(format!("sentence_{i:03}.mp4"));

            let cmd = FfmpegCommand::new(&clip_path)
                .input_with_args(["-loop", "1"], image)
                .input(audio)
                .output_arg("-filter_complex")
                .output_arg(format!(
                    "[0:v]{}[vout]",
                    filters::kenburns_filter(settings.width, settings.height, settings.fps, frames)
                ))
                .map("[vout]")
                .map("1:a")
                .video_codec("libx264")
                .crf(ASSEMBLY_CRF)
                .preset("medium")
                .audio_codec("aac")
                .output_args(["-b:a", "192k"])
                .duration(duration_s)
                .output_arg("-shortest");
            self.runner(&cancel).run(&cmd).await?;

            clip_paths.push(clip_path);
            Self::emit(&events, VideoTaskStatus::Synthesizing, i as u32 + 1, total);
        }

        // Concat in sentence order.
        Self::check_cancel(&cancel)?;
        Self::emit(&events, VideoTaskStatus::Concatenating, 0, total);
        let concat_path = scratch.file("concat.mp4");
        let mut cmd = FfmpegCommand::new(&concat_path);
        for path in &clip_paths {
            cmd = cmd.input(path);
        }
        let cmd = cmd
            .filter_complex(filters::narrative_concat_filter(
                clip_paths.len(),
                settings.width,
                settings.height,
                settings.fps,
            ))
            .map("[vout]")
            .map("[aout]")
            .video_codec("libx264")
            .crf(ASSEMBLY_CRF)
            .preset("medium")
            .audio_codec("aac")
            .output_args(["-b:a", "192k"]);
        self.runner(&cancel).run(&cmd).await?;

        // Burn subtitles in the final enforcement pass.
        let cues: Vec<SubtitleCue> = sentences
            .iter()
            .map(|s| SubtitleCue {
                text: s.subtitle_text.clone(),
                duration_ms: s.duration_ms,
            })
            .collect();
        let srt_path = scratch.file("subtitles.srt");
        tokio::fs::write(&srt_path, build_srt(&cues)).await?;

        Self::check_cancel(&cancel)?;
        let burned_path = scratch.file("burned.mp4");
        let cmd = FfmpegCommand::new(&burned_path)
            .input(&concat_path)
            .video_filter(filters::burnin_filter(
                &srt_path.to_string_lossy(),
                settings.width,
                settings.height,
                settings.fps,
            ))
            .video_codec("libx264")
            .crf(ASSEMBLY_CRF)
            .preset("medium")
            .audio_codec("copy")
            .output_args(["-r", &settings.fps.to_string()]);
        self.runner(&cancel).run(&cmd).await?;
        Self::emit(&events, VideoTaskStatus::Concatenating, total, total);

        let final_path = self
            .mix_bgm(settings, &scratch, burned_path, &events, &cancel)
            .await?;

        let duration_s = probe_clip(&final_path).await?.duration_s;
        let expected: f64 = sentences.iter().map(|s| s.duration_ms as f64 / 1000.0).sum();
        if (duration_s - expected).abs() > 0.1 {
            warn!(
                duration_s,
                expected, "assembled duration deviates from audio arithmetic"
            );
        }

        Ok(AssemblyOutput {
            scratch,
            video_path: final_path,
            duration_s,
        })
    }

    /// Mix BGM into the finished video if configured.
    ///
    /// A zero volume skips the pass entirely so the primary track stays
    /// bit-identical to a no-BGM run.
    async fn mix_bgm(
        &self,
        settings: &OutputSettings,
        scratch: &ScratchDir,
        video_path: PathBuf,
        events: &mpsc::UnboundedSender<AssemblyStep>,
        cancel: &watch::Receiver<bool>,
    ) -> MediaResult<PathBuf> {
        let Some(bgm) = settings.bgm.as_ref().filter(|b| b.volume > 0.0) else {
            return Ok(video_path);
        };

        Self::check_cancel(cancel)?;
        Self::emit(events, VideoTaskStatus::Concatenating, 0, 1);

        let bgm_path = scratch.file("bgm_source");
        let items = [DownloadItem {
            url: bgm.url.clone(),
            file_name: "bgm_source".to_string(),
        }];
        download_all(
            &self.http,
            &items,
            scratch.path(),
            1,
            Some(cancel.clone()),
            |_| {},
        )
        .await?;

        let mixed_path = scratch.file("final.mp4");
        let cmd = FfmpegCommand::new(&mixed_path)
            .input(&video_path)
            .input_with_args(["-stream_loop", "-1"], &bgm_path)
            .filter_complex(filters::bgm_mix_filter(bgm.volume))
            .map("0:v")
            .map("[aout]")
            .video_codec("copy")
            .audio_codec("aac")
            .output_args(["-b:a", "192k", "-shortest"]);
        self.runner(cancel).run(&cmd).await?;

        Self::emit(events, VideoTaskStatus::Concatenating, 1, 1);
        Ok(mixed_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn movie_rejects_empty_input() {
        let assembler = Assembler::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let settings = OutputSettings {
            width: 1920,
            height: 1080,
            fps: 24,
            bgm: None,
        };
        let err = assembler
            .assemble_movie(&settings, &[], tx, cancel_rx)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn narrative_rejects_empty_input() {
        let assembler = Assembler::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let settings = OutputSettings {
            width: 1080,
            height: 1920,
            fps: 30,
            bgm: None,
        };
        let err = assembler
            .assemble_narrative(&settings, &[], tx, cancel_rx)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidInput(_)));
    }
}
