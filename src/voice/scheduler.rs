//! Gapless playback scheduling
//!
//! The scheduler keeps a cursor at the next free output time. Each segment
//! starts exactly where the previous one ended; after an underrun the cursor
//! jumps to `now + lead_window` to absorb network and decode jitter.

use std::time::Duration;

use super::{DEFAULT_LEAD_WINDOW, SAMPLE_RATE, duration_to_samples, samples_to_duration};

/// Placement of one segment on the device clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSegment {
    /// Device time at which the segment starts
    pub start: Duration,
    /// Length of the segment
    pub duration: Duration,
}

impl ScheduledSegment {
    /// Device time at which the segment ends
    #[must_use]
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Sequential, non-overlapping placement of decoded audio
///
/// The cursor is kept as a sample count so placement stays exact at rates
/// that do not divide a second evenly.
#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    cursor: u64,
    lead_window: Duration,
    sample_rate: u32,
    primed: bool,
    released: bool,
    scheduled: u64,
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new(SAMPLE_RATE, DEFAULT_LEAD_WINDOW)
    }
}

impl PlaybackScheduler {
    /// Create a scheduler with its cursor at zero
    #[must_use]
    pub const fn new(sample_rate: u32, lead_window: Duration) -> Self {
        Self {
            cursor: 0,
            lead_window,
            sample_rate,
            primed: false,
            released: false,
            scheduled: 0,
        }
    }

    /// Place a segment of `samples` given the device clock `now`
    ///
    /// Returns `None` for an empty segment or once the scheduler has been
    /// released; the segment is dropped in both cases.
    pub fn schedule(&mut self, samples: usize, now: Duration) -> Option<ScheduledSegment> {
        if self.released || samples == 0 {
            return None;
        }

        let now = duration_to_samples(now, self.sample_rate);

        // The first segment, and any segment after an underrun, starts one
        // lead window ahead of the clock
        if !self.primed || self.cursor < now {
            self.cursor = now + duration_to_samples(self.lead_window, self.sample_rate);
            self.primed = true;
        }

        let start = self.cursor;
        self.cursor += samples as u64;
        self.scheduled += 1;

        Some(ScheduledSegment {
            start: self.to_duration(start),
            duration: samples_to_duration(samples, self.sample_rate),
        })
    }

    /// Next free output time
    #[must_use]
    pub fn cursor(&self) -> Duration {
        self.to_duration(self.cursor)
    }

    /// Configured lead window
    #[must_use]
    pub const fn lead_window(&self) -> Duration {
        self.lead_window
    }

    /// Segments placed since the last reset
    #[must_use]
    pub const fn scheduled(&self) -> u64 {
        self.scheduled
    }

    /// Stop accepting segments; later calls to [`schedule`](Self::schedule) drop them
    pub const fn release(&mut self) {
        self.released = true;
    }

    /// Whether the scheduler has been released
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.released
    }

    /// Start a new session: cursor back to zero, accepting segments again
    pub const fn reset(&mut self) {
        self.cursor = 0;
        self.primed = false;
        self.released = false;
        self.scheduled = 0;
    }

    #[allow(clippy::cast_possible_truncation)]
    fn to_duration(&self, sample: u64) -> Duration {
        samples_to_duration(sample as usize, self.sample_rate)
    }
}
