//! SRT subtitle generation for the narrative pipeline.

/// One subtitle cue: text plus the sentence's measured audio duration.
#[derive(Debug, Clone)]
pub struct SubtitleCue {
    pub text: String,
    pub duration_ms: u64,
}

/// Build an SRT document; cue N starts where cue N-1 ended, matching the
/// concatenated clip timeline exactly.
pub fn build_srt(cues: &[SubtitleCue]) -> String {
    let mut out = String::new();
    let mut cursor_ms: u64 = 0;

    for (i, cue) in cues.iter().enumerate() {
        let start = cursor_ms;
        let end = cursor_ms + cue.duration_ms;
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_timestamp(start),
            format_timestamp(end),
            cue.text.trim()
        ));
        cursor_ms = end;
    }

    out
}

/// Format milliseconds as `HH:MM:SS,mmm`.
pub fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_format_correctly() {
        assert_eq!(format_timestamp(0), "00:00:00,000");
        assert_eq!(format_timestamp(1500), "00:00:01,500");
        assert_eq!(format_timestamp(61_005), "00:01:01,005");
        assert_eq!(format_timestamp(3_661_250), "01:01:01,250");
    }

    #[test]
    fn cues_are_cumulative() {
        let cues = vec![
            SubtitleCue {
                text: "First sentence.".into(),
                duration_ms: 2000,
            },
            SubtitleCue {
                text: "Second sentence.".into(),
                duration_ms: 2500,
            },
            SubtitleCue {
                text: "Third.".into(),
                duration_ms: 3000,
            },
        ];
        let srt = build_srt(&cues);

        assert!(srt.contains("1\n00:00:00,000 --> 00:00:02,000\nFirst sentence."));
        assert!(srt.contains("2\n00:00:02,000 --> 00:00:04,500\nSecond sentence."));
        assert!(srt.contains("3\n00:00:04,500 --> 00:00:07,500\nThird."));
    }

    #[test]
    fn empty_input_yields_empty_document() {
        assert_eq!(build_srt(&[]), "");
    }
}
