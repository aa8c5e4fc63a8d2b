//! WAV duration measurement.
//!
//! TTS duration must be authoritative; for WAV payloads the RIFF header
//! gives the exact answer without shelling out to ffprobe.

use aicg_models::TaskError;

/// Measure the duration of a RIFF/WAVE payload in milliseconds.
///
/// Walks the chunk list for `fmt ` (byte rate) and `data` (payload size);
/// duration = data_len / byte_rate.
pub fn wav_duration_ms(bytes: &[u8]) -> Result<u64, TaskError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(TaskError::malformed("not a RIFF/WAVE payload"));
    }

    let mut byte_rate: Option<u32> = None;
    let mut data_len: Option<u32> = None;

    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let chunk_id = &bytes[pos..pos + 4];
        let chunk_size = u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]);
        let body_start = pos + 8;

        match chunk_id {
            b"fmt " if body_start + 16 <= bytes.len() => {
                byte_rate = Some(u32::from_le_bytes([
                    bytes[body_start + 8],
                    bytes[body_start + 9],
                    bytes[body_start + 10],
                    bytes[body_start + 11],
                ]));
            }
            b"data" => {
                data_len = Some(chunk_size);
            }
            _ => {}
        }

        // Chunks are word-aligned.
        let padded = chunk_size as usize + (chunk_size as usize & 1);
        pos = body_start.saturating_add(padded);
    }

    match (byte_rate, data_len) {
        (Some(rate), Some(len)) if rate > 0 => {
            Ok((len as u64).saturating_mul(1000) / rate as u64)
        }
        _ => Err(TaskError::malformed("WAVE payload missing fmt/data chunks")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal PCM WAV: 16-bit mono at the given sample rate.
    fn make_wav(sample_rate: u32, samples: u32) -> Vec<u8> {
        let byte_rate = sample_rate * 2;
        let data_len = samples * 2;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&1u16.to_le_bytes()); // mono
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&byte_rate.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes()); // block align
        out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        out.extend(std::iter::repeat(0u8).take(data_len as usize));
        out
    }

    #[test]
    fn one_second_at_16khz() {
        let wav = make_wav(16_000, 16_000);
        assert_eq!(wav_duration_ms(&wav).unwrap(), 1000);
    }

    #[test]
    fn fractional_duration() {
        // 24000 samples at 16 kHz = 1.5 s.
        let wav = make_wav(16_000, 24_000);
        assert_eq!(wav_duration_ms(&wav).unwrap(), 1500);
    }

    #[test]
    fn rejects_non_wav() {
        assert!(wav_duration_ms(b"ID3\x03mp3data").is_err());
        assert!(wav_duration_ms(b"").is_err());
    }
}
