//! Voice I/O module
//!
//! Audio capture, the PCM16 frame codec, the capture pipeline, and gapless
//! playback scheduling. Devices sit behind the [`AudioSource`], [`AudioSink`]
//! and [`AudioDevices`] traits so the session engine can run without hardware.

pub mod codec;
mod capture;
mod device;
mod pipeline;
mod playback;
mod resample;
mod scheduler;

use std::time::Duration;

use crate::Result;

pub use capture::{AudioCapture, samples_to_wav};
pub use device::SystemAudio;
pub use pipeline::{AudioFrame, CaptureConfig, CapturePipeline};
pub use playback::{AudioPlayback, Timeline};
pub use resample::RateConverter;
pub use scheduler::{PlaybackScheduler, ScheduledSegment};

/// Wire sample rate (24kHz mono PCM16)
pub const SAMPLE_RATE: u32 = 24000;

/// Default scheduling slack added after an underrun
pub const DEFAULT_LEAD_WINDOW: Duration = Duration::from_millis(50);

/// A microphone handle owned by one session
pub trait AudioSource: Send {
    /// Sample rate the device delivers
    fn sample_rate(&self) -> u32;

    /// Drain samples captured since the last call
    ///
    /// # Errors
    ///
    /// Returns error if the device reported a stream failure
    fn take_samples(&mut self) -> Result<Vec<f32>>;

    /// Release the device; further calls are no-ops
    fn release(&mut self);

    /// Whether the device has been released
    fn is_released(&self) -> bool;
}

/// An output device handle owned by one session
pub trait AudioSink: Send {
    /// Sample rate the device renders at
    fn sample_rate(&self) -> u32;

    /// Current position of the device clock
    fn now(&self) -> Duration;

    /// Queue samples to start playing at `start` on the device clock
    ///
    /// # Errors
    ///
    /// Returns error if the device has been released or failed
    fn enqueue(&mut self, start: Duration, samples: Vec<f32>) -> Result<()>;

    /// Release the device; further calls are no-ops
    fn release(&mut self);

    /// Whether the device has been released
    fn is_released(&self) -> bool;
}

/// Acquires device handles for a new session
pub trait AudioDevices: Send + Sync {
    /// Open the default microphone
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if no suitable input device exists
    fn open_input(&self, sample_rate: u32) -> Result<Box<dyn AudioSource>>;

    /// Open the default speaker
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if no suitable output device exists
    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn AudioSink>>;
}

/// Exact duration of `samples` at `sample_rate`
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = samples as u128 * 1_000_000_000 / u128::from(sample_rate);
    Duration::from_nanos(nanos as u64)
}

/// Nearest sample index to `at` for `sample_rate`
///
/// Rounds, so `samples_to_duration` followed by this returns the original
/// count even when the duration was truncated to whole nanoseconds.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn duration_to_samples(at: Duration, sample_rate: u32) -> u64 {
    ((at.as_nanos() * u128::from(sample_rate) + 500_000_000) / 1_000_000_000) as u64
}
