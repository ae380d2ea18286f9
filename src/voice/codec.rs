//! PCM16 frame codec
//!
//! Converts between `f32` samples in `[-1.0, 1.0]` and signed 16-bit
//! little-endian bytes. Negative values scale by 32768 and non-negative values
//! by 32767 so both rails map exactly onto the i16 range.

/// Bytes per encoded sample
pub const BYTES_PER_SAMPLE: usize = 2;

const NEGATIVE_SCALE: f32 = 32768.0;
const POSITIVE_SCALE: f32 = 32767.0;

/// Encode a single sample to i16
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_sample(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = sample.clamp(-1.0, 1.0);
    let scaled = if s < 0.0 {
        s * NEGATIVE_SCALE
    } else {
        s * POSITIVE_SCALE
    };
    // Saturating float-to-int cast; clamp above keeps it in range anyway
    scaled.round() as i16
}

/// Decode a single i16 back to a float sample
#[must_use]
pub fn decode_sample(value: i16) -> f32 {
    if value < 0 {
        f32::from(value) / NEGATIVE_SCALE
    } else {
        f32::from(value) / POSITIVE_SCALE
    }
}

/// Encode samples to PCM16 little-endian bytes
#[must_use]
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    encode_into(samples, &mut out);
    out
}

/// Encode samples, appending to an existing buffer
pub fn encode_into(samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        out.extend_from_slice(&encode_sample(sample).to_le_bytes());
    }
}

/// Decode PCM16 little-endian bytes to samples
///
/// A trailing odd byte cannot form a sample and is ignored.
#[must_use]
pub fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| decode_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Number of whole samples contained in `bytes`
#[must_use]
pub const fn sample_count(bytes: &[u8]) -> usize {
    bytes.len() / BYTES_PER_SAMPLE
}
