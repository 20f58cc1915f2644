//! 16-bit PCM wire codec.
//!
//! Outbound audio is clamped to [-1, 1], scaled by 32767, written as
//! little-endian i16 and base64 encoded. Inbound payloads reverse the base64
//! step and are then reconstructed by dividing each i16 by 32768.

use crate::audio::frame::AudioFrame;
use crate::error::{Result, VaaniError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Text-safe audio payload with its encoding tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedChunk {
    pub mime_type: String,
    pub data: String,
}

/// Converts a normalized float sample to i16, clamping out-of-range values.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    // NaN clamps to NaN and casts to 0
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Converts an i16 sample back to the normalized float domain.
#[inline]
pub fn i16_to_sample(value: i16) -> f32 {
    value as f32 / 32768.0
}

/// Serializes float samples as little-endian i16 bytes.
pub fn samples_to_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&sample_to_i16(s).to_le_bytes());
    }
    bytes
}

/// Encodes a captured frame for transport.
pub fn encode(samples: &[f32], sample_rate: u32) -> EncodedChunk {
    EncodedChunk {
        mime_type: crate::defaults::pcm_mime_type(sample_rate),
        data: STANDARD.encode(samples_to_bytes(samples)),
    }
}

/// Reverses the text-safe transform, yielding raw PCM bytes.
pub fn decode(payload: &str) -> Result<Vec<u8>> {
    STANDARD.decode(payload).map_err(|e| VaaniError::Codec {
        message: format!("invalid base64 payload: {}", e),
    })
}

/// Reconstructs an audio frame from little-endian i16 PCM bytes.
///
/// # Errors
/// Returns `VaaniError::Codec` if the byte count is odd.
pub fn bytes_to_audio_frame(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioFrame> {
    if bytes.len() % 2 != 0 {
        return Err(VaaniError::Codec {
            message: format!("PCM payload has odd length {}", bytes.len()),
        });
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16_to_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect();
    Ok(AudioFrame::new(samples, sample_rate, channels))
}

/// Decodes a base64 payload straight into an audio frame.
pub fn decode_frame(payload: &str, sample_rate: u32, channels: u16) -> Result<AudioFrame> {
    let bytes = decode(payload)?;
    bytes_to_audio_frame(&bytes, sample_rate, channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Encoding rounds at the 32767 scale (half a step) and decoding divides by
    // 32768, which shifts values near full scale by up to 1/32768 more. The
    // combined worst case is about 1.5/32767, above a single 1/32767 step.
    const CODEC_ROUND_TRIP_BOUND: f32 = 0.5 / 32767.0 + 1.0 / 32768.0 + f32::EPSILON;

    fn round_trip(samples: &[f32]) -> Vec<f32> {
        let chunk = encode(samples, 16000);
        let bytes = decode(&chunk.data).unwrap();
        bytes_to_audio_frame(&bytes, 16000, 1).unwrap().into_samples()
    }

    fn worst_error(samples: &[f32], decoded: &[f32]) -> f32 {
        samples
            .iter()
            .zip(decoded)
            .map(|(orig, got)| (orig - got).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn round_trip_stays_within_quantization_error() {
        let samples: Vec<f32> = (0..=200).map(|i| -1.0 + i as f32 * 0.01).collect();
        let decoded = round_trip(&samples);
        assert_eq!(decoded.len(), samples.len());
        for (orig, got) in samples.iter().zip(&decoded) {
            assert!(
                (orig - got).abs() <= CODEC_ROUND_TRIP_BOUND,
                "sample {} decoded as {} (error {})",
                orig,
                got,
                (orig - got).abs()
            );
        }
    }

    #[test]
    fn fine_sweep_error_peaks_between_one_and_one_and_a_half_steps() {
        let samples: Vec<f32> = (0..=200_000)
            .map(|i| (i as f64 * 1e-5 - 1.0) as f32)
            .collect();
        let decoded = round_trip(&samples);

        let worst = worst_error(&samples, &decoded);
        assert!(worst <= CODEC_ROUND_TRIP_BOUND, "worst error {}", worst);
        // The asymmetric scales cost more than one step near full scale
        assert!(worst > 1.0 / 32767.0, "worst error {}", worst);
    }

    #[test]
    fn out_of_range_values_clamp_instead_of_wrapping() {
        assert_eq!(sample_to_i16(1.5), i16::MAX);
        assert_eq!(sample_to_i16(-3.0), -i16::MAX);
        assert_eq!(sample_to_i16(1.0), i16::MAX);

        let decoded = round_trip(&[1.5, -1.5]);
        assert!(decoded[0] > 0.999);
        assert!(decoded[1] < -0.999);
    }

    #[test]
    fn nan_encodes_as_silence() {
        assert_eq!(sample_to_i16(f32::NAN), 0);
    }

    #[test]
    fn bytes_are_little_endian() {
        let bytes = samples_to_bytes(&[1.0, -1.0, 0.0]);
        assert_eq!(bytes, vec![0xFF, 0x7F, 0x01, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn decoder_divides_by_32768() {
        let bytes = [0x00, 0x80, 0x00, 0x40];
        let frame = bytes_to_audio_frame(&bytes, 24000, 1).unwrap();
        assert_eq!(frame.samples(), &[-1.0, 0.5]);
    }

    #[test]
    fn encode_tags_mime_type_with_rate() {
        let chunk = encode(&[0.0; 4], 16000);
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        assert_eq!(decode(&chunk.data).unwrap().len(), 8);
    }

    #[test]
    fn stereo_payload_preserves_interleaving() {
        // L=0.5, R=-0.5 for two frames
        let bytes = samples_to_bytes(&[0.5, -0.5, 0.25, -0.25]);
        let frame = bytes_to_audio_frame(&bytes, 24000, 2).unwrap();
        assert_eq!(frame.frame_count(), 2);
        let left = frame.channel_data(0).unwrap();
        let right = frame.channel_data(1).unwrap();
        assert!(left.iter().all(|&s| s > 0.0));
        assert!(right.iter().all(|&s| s < 0.0));
        assert!((left[1] - 0.25).abs() <= CODEC_ROUND_TRIP_BOUND);
    }

    #[test]
    fn odd_length_payload_is_rejected() {
        let result = bytes_to_audio_frame(&[0x00, 0x01, 0x02], 24000, 1);
        assert!(matches!(result, Err(VaaniError::Codec { .. })));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let result = decode("not*base64!");
        assert!(matches!(result, Err(VaaniError::Codec { .. })));
    }

    #[test]
    fn decode_frame_duration_matches_byte_length() {
        // 4800 bytes = 2400 samples = 100ms at 24kHz
        let payload = STANDARD.encode(vec![0u8; 4800]);
        let frame = decode_frame(&payload, 24000, 1).unwrap();
        assert!((frame.duration() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn empty_frame_encodes_to_empty_payload() {
        let chunk = encode(&[], 16000);
        assert!(chunk.data.is_empty());
        assert!(round_trip(&[]).is_empty());
    }
}
