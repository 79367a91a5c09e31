//! PCM16 wire format
//!
//! Outgoing frames carry base64 of little-endian signed 16-bit mono PCM at
//! 16 kHz, tagged with a mime type. Incoming frames use the same sample
//! encoding at 24 kHz and arrive as a bare base64 string.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sample rate the speech model expects for microphone audio
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of synthesized speech coming back from the model
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Mime type attached to every outgoing frame at the default input rate
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Full-scale magnitude of a 16-bit sample
const PCM16_SCALE: f32 = 32768.0;

/// Bytes per 16-bit sample
const BYTES_PER_SAMPLE: usize = 2;

/// Mime type for raw PCM at the given rate
#[must_use]
pub fn mime_type_for(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Raw PCM16 audio with its format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    /// Little-endian interleaved samples
    pub bytes: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFrame {
    /// Quantize mono float samples into a frame
    #[must_use]
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            bytes: encode_pcm16(samples),
            sample_rate,
            channels: 1,
        }
    }

    /// Number of sample frames (one sample per channel)
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.bytes.len() / (BYTES_PER_SAMPLE * usize::from(self.channels.max(1)))
    }

    /// Playback duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }

    /// Iterate the signed 16-bit samples
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    /// Base64-encode into a wire frame
    #[must_use]
    pub fn encode(&self) -> EncodedFrame {
        EncodedFrame {
            data: encode_base64(&self.bytes),
            mime_type: mime_type_for(self.sample_rate),
        }
    }
}

/// Frame as sent over the wire: `{ "data": ..., "mimeType": ... }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedFrame {
    /// Base64 of little-endian PCM16, standard alphabet, no wrapping
    pub data: String,
    pub mime_type: String,
}

impl EncodedFrame {
    /// Sample rate declared by the mime type, if any
    #[must_use]
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .find_map(|param| param.trim().strip_prefix("rate="))
            .and_then(|rate| rate.parse().ok())
    }

    /// Decode back into raw PCM
    ///
    /// # Errors
    ///
    /// Returns error if the mime type carries no rate, the payload is not
    /// valid base64, or it holds a partial sample
    pub fn decode(&self) -> Result<PcmFrame> {
        let sample_rate = self
            .sample_rate()
            .ok_or_else(|| Error::Decode(format!("no rate in mime type {:?}", self.mime_type)))?;
        let bytes = decode_base64(&self.data)?;
        Ok(PcmFrame {
            bytes,
            sample_rate,
            channels: 1,
        })
    }

    /// Serialize to the wire JSON object
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a wire JSON object
    ///
    /// # Errors
    ///
    /// Returns error if `json` is not a `{ data, mimeType }` object
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Quantize one float sample to PCM16
///
/// The sample is clamped to [-1, 1] and scaled by 32768; +1.0 saturates to
/// `i16::MAX`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn quantize_sample(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * PCM16_SCALE) as i16
}

/// Normalize one PCM16 sample to [-1, 1)
#[must_use]
pub fn normalize_sample(sample: i16) -> f32 {
    f32::from(sample) / PCM16_SCALE
}

/// Quantize float samples into little-endian PCM16 bytes, reusing `out`
pub fn encode_pcm16_into(samples: &[f32], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        out.extend_from_slice(&quantize_sample(sample).to_le_bytes());
    }
}

/// Quantize float samples into little-endian PCM16 bytes
#[must_use]
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    encode_pcm16_into(samples, &mut out);
    out
}

/// Decode little-endian PCM16 bytes into normalized float samples
///
/// # Errors
///
/// Returns error if the byte count is odd
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(Error::Decode(format!(
            "odd PCM16 byte count: {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| normalize_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Encode bytes as standard base64 without line wrapping
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a standard base64 string
///
/// # Errors
///
/// Returns error if the input is not valid base64
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(data.trim())?)
}

/// Decode a base64 PCM16 payload into normalized float samples
///
/// # Errors
///
/// Returns error on malformed base64 or a partial trailing sample
pub fn decode_base64_pcm16(data: &str) -> Result<Vec<f32>> {
    decode_pcm16(&decode_base64(data)?)
}

/// Root-mean-square level of a block
///
/// Computed on the raw samples before clamping. An empty block has level 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_boundaries() {
        assert_eq!(quantize_sample(0.0), 0);
        assert_eq!(quantize_sample(1.0), i16::MAX);
        assert_eq!(quantize_sample(-1.0), i16::MIN);
        assert_eq!(quantize_sample(3.5), i16::MAX);
        assert_eq!(quantize_sample(-7.0), i16::MIN);
        assert_eq!(quantize_sample(0.5), 16384);
    }

    #[test]
    fn test_quantization_within_one_step() {
        let original: Vec<f32> = (0..=200).map(|i| (i as f32 / 100.0) - 1.0).collect();
        let decoded = decode_pcm16(&encode_pcm16(&original)).unwrap();

        assert_eq!(decoded.len(), original.len());
        for (a, b) in original.iter().zip(&decoded) {
            assert!((a - b).abs() <= 1.0 / PCM16_SCALE, "{a} vs {b}");
        }
    }

    #[test]
    fn test_little_endian_layout() {
        let bytes = encode_pcm16(&[0.5, -0.5]);
        assert_eq!(bytes, vec![0x00, 0x40, 0x00, 0xC0]);
    }

    #[test]
    fn test_decode_rejects_odd_bytes() {
        assert!(matches!(decode_pcm16(&[1, 2, 3]), Err(Error::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        assert!(matches!(
            decode_base64_pcm16("not base64!!"),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_rms_level() {
        assert!(rms_level(&[0.0; 4096]).abs() < f32::EPSILON);
        assert!((rms_level(&[1.0; 4096]) - 1.0).abs() < 1e-6);
        assert!((rms_level(&[-1.0; 4096]) - 1.0).abs() < 1e-6);
        assert!(rms_level(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_encoded_frame_wire_shape() {
        let frame = PcmFrame::from_samples(&[0.0, 0.25], INPUT_SAMPLE_RATE).encode();
        assert_eq!(frame.mime_type, INPUT_MIME_TYPE);
        assert_eq!(frame.sample_rate(), Some(INPUT_SAMPLE_RATE));

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["mimeType"], "audio/pcm;rate=16000");
        assert!(!frame.data.contains('\n'));

        let decoded = frame.decode().unwrap();
        assert_eq!(decoded.frame_count(), 2);
        assert_eq!(decoded.samples().collect::<Vec<_>>(), vec![0, 8192]);
    }

    #[test]
    fn test_frame_duration() {
        let frame = PcmFrame::from_samples(&[0.0; 2400], OUTPUT_SAMPLE_RATE);
        assert!((frame.duration() - 0.1).abs() < 1e-9);
    }
}
