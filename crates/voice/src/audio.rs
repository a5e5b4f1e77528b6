//! PCM framing and sample-rate conversion.
//!
//! The remote service consumes little-endian PCM16 at a fixed input rate
//! and produces PCM16 at a fixed output rate; the device side works in
//! mono `f32`. Everything here converts between those worlds.
//!
//! The resampler is a deterministic block-averaging decimator, not a
//! sinc/polynomial filter: voice-bandwidth speech tolerates it and tests
//! can assert its output exactly.

use base64::Engine;

/// Sample rate the remote service expects for uplink audio.
pub const SERVICE_INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of the synthesized speech the service sends back.
pub const SERVICE_OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// A fixed-size block of mono samples at the capture device's native rate.
///
/// Created per capture callback, consumed immediately by the uplink,
/// never retained.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    /// Monotonically increasing per capture stream.
    pub sequence: u64,
}

/// Converts samples from `from_rate` to `to_rate` by block averaging.
///
/// Each output sample `i` is the mean of the input samples whose position
/// falls in `[i * ratio, (i + 1) * ratio)` with `ratio = from / to`. When
/// the window rounds empty (upsampling) the window's first sample is used,
/// which degrades to sample duplication. Output length is
/// `floor(len / ratio)`; equal rates pass through unchanged.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (input.len() as f64 / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let start = (i as f64 * ratio).floor() as usize;
        let end = ((i + 1) as f64 * ratio).floor() as usize;
        let mut sum = 0.0f32;
        let mut count = 0usize;
        for j in start..end.min(input.len()) {
            sum += input[j];
            count += 1;
        }
        out.push(if count > 0 { sum / count as f32 } else { input[start] });
    }
    out
}

/// Root-mean-square loudness of a frame.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Maps frame loudness to the 0..1 level consumed by the visual indicator.
pub fn volume_level(samples: &[f32]) -> f32 {
    (rms(samples) * 5.0).min(1.0)
}

/// Encodes `f32` samples as base64-wrapped little-endian PCM16.
pub fn encode_base64_pcm16(pcm: &[f32]) -> String {
    let bytes: Vec<u8> = pcm
        .iter()
        .flat_map(|&sample| {
            let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&bytes)
}

/// Decodes a base64 PCM16 payload into normalized `f32` samples.
///
/// Returns an empty vector on malformed base64; callers treat that as a
/// dropped chunk rather than an error.
pub fn decode_base64_pcm16(data: &str) -> Vec<f32> {
    match base64::engine::general_purpose::STANDARD.decode(data) {
        Ok(bytes) => bytes
            .chunks_exact(2)
            .map(|chunk| {
                let v = i16::from_le_bytes([chunk[0], chunk[1]]);
                (v as f32 / 32768.0).clamp(-1.0, 1.0)
            })
            .collect(),
        Err(_) => {
            tracing::error!("failed to decode base64 PCM16 payload");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn resample_equal_rates_is_identity() {
        let input = vec![0.1, -0.2, 0.3, -0.4];
        assert_eq!(resample(&input, 24_000, 24_000), input);
    }

    #[test]
    fn resample_halves_length_and_averages_pairs() {
        let input = vec![0.0, 1.0, 0.5, -0.5, 0.2, 0.4];
        let out = resample(&input, 32_000, 16_000);
        assert_eq!(out.len(), 3);
        assert_abs_diff_eq!(out[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[2], 0.3, epsilon = 1e-6);
    }

    #[test]
    fn resample_48k_to_16k_averages_triples() {
        let input = vec![0.3, 0.3, 0.3, -0.6, 0.0, 0.6];
        let out = resample(&input, 48_000, 16_000);
        assert_eq!(out.len(), 2);
        assert_abs_diff_eq!(out[0], 0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn resample_empty_input_is_empty() {
        assert!(resample(&[], 48_000, 16_000).is_empty());
        assert!(resample(&[], 16_000, 16_000).is_empty());
    }

    #[test]
    fn resample_upsampling_duplicates_samples() {
        let input = vec![0.25, -0.75];
        let out = resample(&input, 12_000, 24_000);
        assert_eq!(out.len(), 4);
        assert_abs_diff_eq!(out[0], 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(out[2], -0.75, epsilon = 1e-6);
        assert_abs_diff_eq!(out[3], -0.75, epsilon = 1e-6);
    }

    #[test]
    fn rms_of_constant_signal() {
        let samples = vec![0.5; 128];
        assert_abs_diff_eq!(rms(&samples), 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(rms(&[]), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn volume_level_is_clipped_to_one() {
        let loud = vec![1.0; 64];
        assert_abs_diff_eq!(volume_level(&loud), 1.0, epsilon = 1e-6);
        let quiet = vec![0.02; 64];
        assert_abs_diff_eq!(volume_level(&quiet), 0.1, epsilon = 1e-4);
    }

    #[test]
    fn encode_decode_round_trip() {
        let input = vec![0.5f32, -1.0, 0.0, 0.25];
        let decoded = decode_base64_pcm16(&encode_base64_pcm16(&input));
        assert_eq!(decoded.len(), input.len());
        for (a, b) in input.iter().zip(decoded.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-3);
        }
    }

    #[test]
    fn encode_clamps_out_of_range_samples() {
        let decoded = decode_base64_pcm16(&encode_base64_pcm16(&[2.0, -2.0]));
        assert!(decoded[0] <= 1.0);
        assert!(decoded[1] >= -1.0);
    }

    #[test]
    fn decode_rejects_malformed_base64() {
        assert!(decode_base64_pcm16("not base64!").is_empty());
    }

    #[test]
    fn decode_ignores_trailing_odd_byte() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([0x00u8, 0x40, 0x7f]);
        let decoded = decode_base64_pcm16(&encoded);
        assert_eq!(decoded.len(), 1);
        assert_abs_diff_eq!(decoded[0], 0.5, epsilon = 1e-4);
    }
}
