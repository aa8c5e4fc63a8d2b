//! Filter-graph builders.
//!
//! Pure string builders so the graphs are unit-testable without running
//! FFmpeg.

/// Frames to trim off the head of every clip after the first.
///
/// Consecutive transition clips share a keyframe across the cut (clip N+1
/// starts on clip N's last frame); trimming `round(1.5 × fps)` leading
/// frames removes the duplicated anchor and the generator's settle-in.
pub fn trim_frames(clip_fps: f64) -> u32 {
    (1.5 * clip_fps).round() as u32
}

/// Authoritative fps across probed clips: the majority value, or `None`
/// on a split vote (caller falls back to the target fps and re-encodes).
pub fn majority_fps(fps_values: &[f64]) -> Option<i32> {
    if fps_values.is_empty() {
        return None;
    }
    let mut counts: std::collections::HashMap<i32, usize> = std::collections::HashMap::new();
    for fps in fps_values {
        *counts.entry(fps.round() as i32).or_default() += 1;
    }
    let best = counts.iter().max_by_key(|(_, count)| *count)?;
    let tied = counts.values().filter(|c| *c == best.1).count() > 1;
    if tied {
        None
    } else {
        Some(*best.0)
    }
}

/// Normalize one concat leg: scale/pad to the target frame, reset PTS.
fn scaled(width: i32, height: i32, fps: i32) -> String {
    format!(
        "fps={fps},scale={width}:{height}:force_original_aspect_ratio=decrease,\
         pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setpts=PTS-STARTPTS"
    )
}

/// Filter graph concatenating `n` transition clips with overlap trimming.
///
/// Every clip after the first drops `trim` leading frames (video) and the
/// equivalent `trim / clip_fps` seconds of audio, preserving A/V sync.
pub fn movie_concat_filter(
    n: usize,
    trim: u32,
    clip_fps: f64,
    width: i32,
    height: i32,
    fps: i32,
) -> String {
    let mut graph = String::new();
    let audio_trim_s = trim as f64 / clip_fps;

    for i in 0..n {
        if i == 0 {
            graph.push_str(&format!("[{i}:v]{}[v{i}];", scaled(width, height, fps)));
            graph.push_str(&format!("[{i}:a]aresample=48000,asetpts=PTS-STARTPTS[a{i}];"));
        } else {
            graph.push_str(&format!(
                "[{i}:v]trim=start_frame={trim},{}[v{i}];",
                scaled(width, height, fps)
            ));
            graph.push_str(&format!(
                "[{i}:a]atrim=start={audio_trim_s:.6},aresample=48000,asetpts=PTS-STARTPTS[a{i}];"
            ));
        }
    }

    for i in 0..n {
        graph.push_str(&format!("[v{i}][a{i}]"));
    }
    graph.push_str(&format!("concat=n={n}:v=1:a=1[vout][aout]"));
    graph
}

/// Filter graph concatenating narrative sentence clips (no trimming; the
/// clips were rendered independently).
pub fn narrative_concat_filter(n: usize, width: i32, height: i32, fps: i32) -> String {
    let mut graph = String::new();
    for i in 0..n {
        graph.push_str(&format!("[{i}:v]{}[v{i}];", scaled(width, height, fps)));
        graph.push_str(&format!("[{i}:a]aresample=48000,asetpts=PTS-STARTPTS[a{i}];"));
    }
    for i in 0..n {
        graph.push_str(&format!("[v{i}][a{i}]"));
    }
    graph.push_str(&format!("concat=n={n}:v=1:a=1[vout][aout]"));
    graph
}

/// Ken-burns zoom for one sentence image; `frames` sets the clip length.
pub fn kenburns_filter(width: i32, height: i32, fps: i32, frames: u32) -> String {
    format!(
        "scale={sw}:-2,zoompan=z='min(zoom+0.0008,1.12)':d={frames}:\
         x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)':s={width}x{height}:fps={fps},\
         format=yuv420p",
        sw = width * 2
    )
}

/// BGM mix graph: input 0 is the finished video, input 1 the (looped)
/// music. The music is leveled to `volume`, cut to the video length and
/// ducked roughly 6 dB under the primary track via sidechain compression.
pub fn bgm_mix_filter(volume: f32) -> String {
    format!(
        "[1:a]volume={volume:.3}[bgm];\
         [0:a]asplit=2[amain][sc];\
         [bgm][sc]sidechaincompress=threshold=0.02:ratio=2:attack=20:release=400[ducked];\
         [amain][ducked]amix=inputs=2:duration=first:dropout_transition=2:normalize=0[aout]"
    )
}

/// Subtitle burn-in plus final resolution/fps enforcement.
pub fn burnin_filter(srt_path: &str, width: i32, height: i32, fps: i32) -> String {
    // Colons and quotes in the path would break filter parsing.
    let escaped = srt_path.replace('\\', "\\\\").replace(':', "\\:").replace('\'', "\\'");
    format!(
        "subtitles='{escaped}':force_style='FontSize=18,Outline=1,MarginV=40',\
         {}",
        scaled(width, height, fps)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_frames_follows_formula() {
        assert_eq!(trim_frames(24.0), 36);
        assert_eq!(trim_frames(23.976), 36);
        assert_eq!(trim_frames(30.0), 45);
        assert_eq!(trim_frames(25.0), 38);
        assert_eq!(trim_frames(60.0), 90);
    }

    #[test]
    fn majority_fps_votes() {
        assert_eq!(majority_fps(&[24.0, 24.0, 23.976]), Some(24));
        assert_eq!(majority_fps(&[24.0, 30.0, 30.0]), Some(30));
        // split vote: caller uses the target fps
        assert_eq!(majority_fps(&[24.0, 30.0]), None);
        assert_eq!(majority_fps(&[]), None);
    }

    #[test]
    fn movie_concat_trims_all_but_first() {
        let graph = movie_concat_filter(3, 36, 24.0, 1920, 1080, 24);
        assert!(!graph.contains("[0:v]trim"));
        assert!(graph.contains("[1:v]trim=start_frame=36"));
        assert!(graph.contains("[2:v]trim=start_frame=36"));
        assert!(graph.contains("[1:a]atrim=start=1.500000"));
        assert!(graph.contains("concat=n=3:v=1:a=1[vout][aout]"));
    }

    #[test]
    fn single_clip_graph_has_no_trim() {
        let graph = movie_concat_filter(1, 36, 24.0, 1280, 720, 24);
        assert!(!graph.contains("trim"));
        assert!(graph.contains("concat=n=1"));
    }

    #[test]
    fn audio_trim_matches_video_trim_duration() {
        // 45 frames at 30 fps = exactly 1.5 s of audio.
        let graph = movie_concat_filter(2, 45, 30.0, 1920, 1080, 30);
        assert!(graph.contains("atrim=start=1.500000"));
    }

    #[test]
    fn bgm_filter_levels_and_ducks() {
        let graph = bgm_mix_filter(0.15);
        assert!(graph.contains("volume=0.150"));
        assert!(graph.contains("sidechaincompress"));
        assert!(graph.contains("duration=first"));
    }

    #[test]
    fn burnin_escapes_path_colons() {
        let graph = burnin_filter("/tmp/aicg-x/subs.srt", 1920, 1080, 30);
        assert!(graph.contains("subtitles="));
        assert!(!graph.contains("C:"));
        let windowsy = burnin_filter("C:/tmp/subs.srt", 1920, 1080, 30);
        assert!(windowsy.contains("C\\:"));
    }
}
