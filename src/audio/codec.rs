//! Sample format conversion and wire transport encoding
//!
//! The live service speaks 16-bit linear PCM carried as base64 text inside
//! JSON frames; the audio devices speak normalized f32. Everything here is
//! a pure function, safe to call from any task.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// MIME type declared on outbound microphone payloads (16kHz mono PCM)
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// A text-safe encoding of a PCM frame plus its declared format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePayload {
    /// Base64-encoded little-endian PCM bytes
    pub data: String,

    /// Declared sample format, e.g. `audio/pcm;rate=16000`
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// Convert normalized f32 samples to 16-bit linear PCM
///
/// Samples are clamped to [-1.0, 1.0] first so out-of-range input can never
/// wrap around the i16 range. Negative values scale by 32768 and
/// non-negative by 32767; the asymmetry matches the signed 16-bit range and
/// is what the service expects on the wire.
#[must_use]
pub fn to_linear_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Convert 16-bit linear PCM back to normalized f32 samples
#[must_use]
pub fn to_normalized(pcm: &[i16]) -> Vec<f32> {
    pcm.iter()
        .map(|&v| {
            if v < 0 {
                f32::from(v) / 32768.0
            } else {
                f32::from(v) / 32767.0
            }
        })
        .collect()
}

/// Encode a PCM frame for transport
#[must_use]
pub fn encode(pcm: &[i16]) -> WirePayload {
    let mut bytes = Vec::with_capacity(pcm.len() * 2);
    for &sample in pcm {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    WirePayload {
        data: base64::engine::general_purpose::STANDARD.encode(&bytes),
        mime_type: CAPTURE_MIME_TYPE.to_string(),
    }
}

/// Decode a transport payload back to a PCM frame
///
/// # Errors
///
/// Returns [`Error::Decode`] if the payload is not valid base64 or the
/// decoded byte length is not a whole number of 16-bit samples.
pub fn decode(payload: &WirePayload) -> Result<Vec<i16>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&payload.data)
        .map_err(|e| Error::Decode(format!("invalid base64 payload: {e}")))?;

    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "payload length {} is not a whole number of samples",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}
