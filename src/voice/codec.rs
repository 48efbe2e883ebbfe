//! PCM codec between native float samples and the remote wire format
//!
//! The remote endpoint speaks little-endian signed 16-bit PCM wrapped in a
//! base64 envelope.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sample rate of outbound microphone audio
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Scale between normalized floats and signed 16-bit samples
const I16_SCALE: f32 = 32768.0;

/// Encoded outbound audio payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFrame {
    /// Encoding tag, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
    /// Base64 of little-endian 16-bit PCM
    pub data: String,
}

/// MIME tag for raw mono 16-bit PCM at `sample_rate`
#[must_use]
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Encode microphone samples as a 16 kHz mono wire frame
#[must_use]
pub fn encode(samples: &[f32]) -> WireFrame {
    encode_with_rate(samples, INPUT_SAMPLE_RATE)
}

/// Encode samples as a wire frame tagged with `sample_rate`
#[must_use]
pub fn encode_with_rate(samples: &[f32], sample_rate: u32) -> WireFrame {
    WireFrame {
        mime_type: pcm_mime_type(sample_rate),
        data: STANDARD.encode(samples_to_pcm16(samples)),
    }
}

/// Convert float samples to little-endian 16-bit PCM bytes
///
/// Samples outside `[-1, 1]` are clamped; NaN encodes as silence.
#[must_use]
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    bytes
}

/// Quantize one normalized sample
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn sample_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * I16_SCALE)
        .round()
        .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

/// Normalize one 16-bit sample to `[-1, 1)`
#[must_use]
pub fn i16_to_sample(value: i16) -> f32 {
    f32::from(value) / I16_SCALE
}

/// Reverse the base64 transport envelope into raw bytes
///
/// # Errors
///
/// Returns `MalformedPayload` if the text is not valid base64
pub fn decode_envelope(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| Error::MalformedPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: f32 = 1.0 / I16_SCALE;

    fn roundtrip(samples: &[f32]) -> Vec<f32> {
        let frame = encode(samples);
        let bytes = decode_envelope(&frame.data).unwrap();
        bytes
            .chunks_exact(2)
            .map(|b| i16_to_sample(i16::from_le_bytes([b[0], b[1]])))
            .collect()
    }

    #[test]
    fn frame_is_tagged_as_16k_pcm() {
        let frame = encode(&[0.0; 4]);
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
        assert_eq!(decode_envelope(&frame.data).unwrap().len(), 8);
    }

    #[test]
    fn roundtrip_within_one_quantization_step() {
        let samples: Vec<f32> = (0..2001).map(|i| (i as f32 / 1000.0) - 1.0).collect();
        let decoded = roundtrip(&samples);
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(&decoded) {
            assert!((a - b).abs() <= STEP, "{a} decoded as {b}");
        }
    }

    #[test]
    fn writes_little_endian() {
        let bytes = samples_to_pcm16(&[0.5, -0.5]);
        assert_eq!(bytes, vec![0x00, 0x40, 0x00, 0xC0]);
    }

    #[test]
    fn clamps_out_of_range_samples() {
        assert_eq!(sample_to_i16(4.0), i16::MAX);
        assert_eq!(sample_to_i16(-4.0), i16::MIN);
        assert_eq!(sample_to_i16(1.0), i16::MAX);
        assert_eq!(sample_to_i16(-1.0), i16::MIN);
        assert_eq!(sample_to_i16(f32::NAN), 0);
    }

    #[test]
    fn empty_input_encodes_empty_payload() {
        let frame = encode(&[]);
        assert!(frame.data.is_empty());
    }

    #[test]
    fn rejects_invalid_base64() {
        let err = decode_envelope("not base64!!").unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[test]
    fn serializes_camel_case() {
        let frame = encode(&[0.0]);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(json["data"], "AAA=");
    }
}
