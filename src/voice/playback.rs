//! Audio playback to speakers
//!
//! Playback renders a [`Timeline`] of segments placed at absolute sample
//! positions. The device clock is the number of frames rendered so far, so
//! scheduling decisions and audible output share one clock domain.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};

use super::device::{StreamKeeper, device_name, find_config};
use super::resample::{self, RateConverter};
use super::{AudioSink, duration_to_samples, samples_to_duration};
use crate::{Error, Result};

/// A segment placed at an absolute sample position
#[derive(Debug)]
struct TimedSegment {
    start: u64,
    samples: Vec<f32>,
}

impl TimedSegment {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Ordered, non-overlapping segments rendered against a sample clock
#[derive(Debug, Default)]
pub struct Timeline {
    rendered: u64,
    segments: VecDeque<TimedSegment>,
}

impl Timeline {
    /// Create an empty timeline at position zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames rendered so far
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.rendered
    }

    /// Segments not yet fully rendered
    #[must_use]
    pub fn pending(&self) -> usize {
        self.segments.len()
    }

    /// Place `samples` at absolute sample position `start`
    ///
    /// Segments must arrive in start order; the scheduler guarantees this.
    pub fn insert(&mut self, start: u64, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        if let Some(last) = self.segments.back() {
            if start < last.end() {
                tracing::warn!(
                    start,
                    previous_end = last.end(),
                    "segment overlaps previous segment"
                );
            }
        }
        self.segments.push_back(TimedSegment { start, samples });
    }

    /// Fill interleaved `out` with `channels` copies of each mono sample
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        for frame in out.chunks_mut(channels) {
            let pos = self.rendered;

            while self.segments.front().is_some_and(|s| s.end() <= pos) {
                self.segments.pop_front();
            }

            let sample = match self.segments.front() {
                Some(segment) if segment.start <= pos => {
                    #[allow(clippy::cast_possible_truncation)]
                    let offset = (pos - segment.start) as usize;
                    segment.samples[offset]
                }
                _ => 0.0,
            };

            frame.fill(sample);
            self.rendered += 1;
        }
    }

    /// Drop everything not yet rendered
    pub fn clear(&mut self) {
        self.segments.clear();
    }
}

/// Feeds a device callback from the timeline
///
/// The timeline always advances in wire-rate samples. When the device runs at
/// another rate, whole blocks are rendered and converted ahead of the device.
struct DeviceFeed {
    channels: usize,
    converter: Option<RateConverter>,
    block: Vec<f32>,
    ready: VecDeque<f32>,
}

impl DeviceFeed {
    fn new(channels: usize, converter: Option<RateConverter>) -> Self {
        Self {
            channels: channels.max(1),
            converter,
            block: Vec::new(),
            ready: VecDeque::new(),
        }
    }

    fn fill(&mut self, timeline: &mut Timeline, out: &mut [f32]) {
        let Some(converter) = self.converter.as_mut() else {
            timeline.render(out, self.channels);
            return;
        };

        let frames = out.len() / self.channels;
        while self.ready.len() < frames {
            self.block.resize(converter.block_frames(), 0.0);
            timeline.render(&mut self.block, 1);
            match converter.process(&self.block) {
                Ok(converted) if !converted.is_empty() => self.ready.extend(converted),
                Ok(_) => break,
                Err(e) => {
                    tracing::error!(error = %e, "playback conversion failed");
                    break;
                }
            }
        }

        for frame in out.chunks_mut(self.channels) {
            frame.fill(self.ready.pop_front().unwrap_or(0.0));
        }
    }
}

/// Plays scheduled audio to the default output device
pub struct AudioPlayback {
    sample_rate: u32,
    timeline: Arc<Mutex<Timeline>>,
    keeper: Option<StreamKeeper>,
}

impl AudioPlayback {
    /// Open the default output device and start rendering silence
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if there is no usable output device. A
    /// device that cannot run at `sample_rate` is fed through a converter.
    pub fn open(sample_rate: u32) -> Result<Self> {
        let timeline = Arc::new(Mutex::new(Timeline::new()));
        let stream_timeline = Arc::clone(&timeline);

        let keeper = StreamKeeper::spawn("voxlink-playback", move || {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;

            let config = find_config(
                || device.supported_output_configs().ok(),
                device.default_output_config().ok(),
                sample_rate,
            )
            .ok_or_else(|| {
                Error::DeviceUnavailable("no suitable output config found".to_string())
            })?;
            let channels = usize::from(config.channels);
            let device_rate = config.sample_rate.0;
            let mut feed = DeviceFeed::new(channels, resample::bridge(sample_rate, device_rate)?);

            tracing::debug!(
                device = device_name(&device),
                sample_rate,
                device_rate,
                channels,
                "audio playback initialized"
            );

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        if let Ok(mut timeline) = stream_timeline.lock() {
                            feed.fill(&mut timeline, data);
                        } else {
                            data.fill(0.0);
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::DeviceUnavailable(e.to_string()))
        })?;

        Ok(Self {
            sample_rate,
            timeline,
            keeper: Some(keeper),
        })
    }

    /// Segments queued but not yet fully played
    #[must_use]
    pub fn pending(&self) -> usize {
        self.timeline.lock().map(|t| t.pending()).unwrap_or_default()
    }
}

impl AudioSink for AudioPlayback {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> Duration {
        let rendered = self.timeline.lock().map(|t| t.position()).unwrap_or_default();
        #[allow(clippy::cast_possible_truncation)]
        samples_to_duration(rendered as usize, self.sample_rate)
    }

    fn enqueue(&mut self, start: Duration, samples: Vec<f32>) -> Result<()> {
        if self.keeper.is_none() {
            return Err(Error::Audio("playback device released".to_string()));
        }
        let start = duration_to_samples(start, self.sample_rate);
        self.timeline
            .lock()
            .map_err(|_| Error::Audio("playback timeline poisoned".to_string()))?
            .insert(start, samples);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut keeper) = self.keeper.take() {
            if let Ok(mut timeline) = self.timeline.lock() {
                timeline.clear();
            }
            keeper.release();
            tracing::debug!("audio playback stopped");
        }
    }

    fn is_released(&self) -> bool {
        self.keeper.is_none()
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.release();
    }
}
