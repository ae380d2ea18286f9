//! Capture pipeline: microphone blocks to fixed-length PCM16 frames
//!
//! Each tick drains the input device, applies the configured linear gain,
//! cuts the stream into fixed-length frames and encodes them. Frames are
//! emitted in capture order, one channel message per frame.

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::{AudioSource, SAMPLE_RATE, codec, samples_to_duration};
use crate::Result;

/// One encoded block of capture audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Position in capture order, starting at zero per session
    pub sequence: u64,
    /// PCM16 little-endian mono samples
    pub pcm: Vec<u8>,
}

impl AudioFrame {
    /// Number of samples in the frame
    #[must_use]
    pub fn sample_count(&self) -> usize {
        codec::sample_count(&self.pcm)
    }
}

/// Capture pipeline settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureConfig {
    /// Device and wire sample rate
    pub sample_rate: u32,
    /// Samples per emitted frame
    pub frame_samples: usize,
    /// Linear gain applied before encoding
    pub gain: f32,
    /// Frames of unsent audio kept before the oldest is discarded
    pub max_backlog_frames: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            frame_samples: 480,
            gain: 1.0,
            max_backlog_frames: 50,
        }
    }
}

impl CaptureConfig {
    /// Time covered by one frame; also the capture tick interval
    #[must_use]
    pub fn frame_duration(&self) -> Duration {
        samples_to_duration(self.frame_samples, self.sample_rate)
    }
}

/// Frames captured samples and drives the capture task
#[derive(Debug)]
pub struct CapturePipeline {
    config: CaptureConfig,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl CapturePipeline {
    /// Create a pipeline with an empty backlog
    #[must_use]
    pub fn new(config: CaptureConfig) -> Self {
        let config = CaptureConfig {
            frame_samples: config.frame_samples.max(1),
            max_backlog_frames: config.max_backlog_frames.max(1),
            ..config
        };
        Self {
            config,
            pending: Vec::with_capacity(config.frame_samples * 2),
            next_sequence: 0,
        }
    }

    /// Pipeline settings
    #[must_use]
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Samples waiting for a full frame
    #[must_use]
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Append a captured block and return every complete frame
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let gain = self.config.gain;
        self.pending.extend(samples.iter().map(|s| s * gain));

        let limit = self.config.frame_samples * self.config.max_backlog_frames;
        if self.pending.len() > limit {
            let excess = self.pending.len() - limit;
            // Keep the most recent audio
            self.pending.drain(..excess);
            tracing::warn!(
                dropped_samples = excess,
                "capture backlog exceeded, discarding oldest audio"
            );
        }

        let frame_samples = self.config.frame_samples;
        let complete = self.pending.len() / frame_samples;
        let mut frames = Vec::with_capacity(complete);
        for chunk in self.pending.chunks_exact(frame_samples) {
            frames.push(AudioFrame {
                sequence: self.next_sequence,
                pcm: codec::encode(chunk),
            });
            self.next_sequence += 1;
        }
        self.pending.drain(..complete * frame_samples);

        frames
    }

    /// Run the capture loop until cancelled or the receiver goes away
    ///
    /// Returns the source so the owner can release it on its own exit path.
    ///
    /// # Errors
    ///
    /// Returns the source alongside the device error if capture fails
    pub async fn run(
        mut self,
        mut source: Box<dyn AudioSource>,
        frames: mpsc::Sender<AudioFrame>,
        mut cancel: watch::Receiver<bool>,
    ) -> (Box<dyn AudioSource>, Result<()>) {
        let mut ticker = tokio::time::interval(self.config.frame_duration());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::debug!(
            frame_samples = self.config.frame_samples,
            gain = self.config.gain,
            "capture pipeline running"
        );

        loop {
            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let samples = match source.take_samples() {
                        Ok(samples) => samples,
                        Err(e) => return (source, Err(e)),
                    };
                    for frame in self.push(&samples) {
                        if frames.send(frame).await.is_err() {
                            tracing::debug!("frame receiver closed, stopping capture");
                            return (source, Ok(()));
                        }
                    }
                }
            }
        }

        tracing::debug!(frames = self.next_sequence, "capture pipeline stopped");
        (source, Ok(()))
    }
}
