//! Sample-rate conversion between device and wire rates
//!
//! Devices that cannot run at the wire rate are opened at their native rate
//! and converted here, block by block, inside the stream callbacks.

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Requested input block size; rubato rounds it to fit the rate ratio
const CHUNK_FRAMES: usize = 480;

/// Streaming mono rate converter
///
/// Input that does not fill a whole block is held until the next call.
pub struct RateConverter {
    from_rate: u32,
    to_rate: u32,
    resampler: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl RateConverter {
    /// Create a converter from `from_rate` to `to_rate`
    ///
    /// # Errors
    ///
    /// Returns `Audio` if either rate is zero or the ratio is unsupported
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler =
            FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_FRAMES, 2, 1)
                .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

        Ok(Self {
            from_rate,
            to_rate,
            resampler,
            pending: Vec::new(),
        })
    }

    /// Input rate
    #[must_use]
    pub const fn from_rate(&self) -> u32 {
        self.from_rate
    }

    /// Output rate
    #[must_use]
    pub const fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Input samples consumed per conversion block
    #[must_use]
    pub fn block_frames(&self) -> usize {
        self.resampler.input_frames_next()
    }

    /// Input samples held back waiting for a full block
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Convert `samples`, returning every whole block produced so far
    ///
    /// # Errors
    ///
    /// Returns `Audio` if the resampler rejects a block
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        let mut consumed = 0;
        loop {
            let block = self.resampler.input_frames_next();
            if self.pending.len() - consumed < block {
                break;
            }
            let input = &self.pending[consumed..consumed + block];
            let converted = self
                .resampler
                .process(&[input], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            if let Some(channel) = converted.first() {
                out.extend_from_slice(channel);
            }
            consumed += block;
        }

        self.pending.drain(..consumed);
        Ok(out)
    }
}

/// Converter from `from_rate` to `to_rate`, or `None` when they already match
///
/// # Errors
///
/// Returns `DeviceUnavailable` if no converter can bridge the two rates
pub(crate) fn bridge(from_rate: u32, to_rate: u32) -> Result<Option<RateConverter>> {
    if from_rate == to_rate {
        return Ok(None);
    }
    RateConverter::new(from_rate, to_rate)
        .map(Some)
        .map_err(|e| Error::DeviceUnavailable(format!("{from_rate} Hz to {to_rate} Hz: {e}")))
}
