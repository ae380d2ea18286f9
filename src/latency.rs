//! Response latency tracking
//!
//! Measures the gap between the remote side reporting end of user speech and
//! the first output audio of the reply. Only the first delta of each turn is
//! measured; later deltas of the same reply are ignored.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// One measured end-of-speech to first-audio gap
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LatencySample(pub Duration);

impl LatencySample {
    /// Latency in whole milliseconds
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }
}

/// Snapshot of the session's latency statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyReport {
    /// Most recent sample in milliseconds
    pub latest_ms: u64,
    /// Arithmetic mean over the session in milliseconds
    pub mean_ms: f64,
    /// Number of samples recorded
    pub samples: usize,
}

/// Per-session latency tracker
#[derive(Debug, Default)]
pub struct LatencyTracker {
    stopped_at: Option<Instant>,
    measured: bool,
    samples: Vec<LatencySample>,
    total: Duration,
}

impl LatencyTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The remote side reported the user stopped speaking
    pub fn on_user_stopped(&mut self, at: Instant) {
        self.stopped_at = Some(at);
        self.measured = false;
    }

    /// Output audio arrived; returns a sample only for the first delta of a turn
    pub fn on_first_output_audio(&mut self, at: Instant) -> Option<LatencySample> {
        let stopped_at = self.stopped_at?;
        if self.measured {
            return None;
        }

        self.measured = true;
        let sample = LatencySample(at.saturating_duration_since(stopped_at));
        self.samples.push(sample);
        self.total += sample.0;

        if let Some(report) = self.report() {
            tracing::info!(
                latency_ms = report.latest_ms,
                avg_ms = report.mean_ms.round(),
                samples = report.samples,
                "response latency"
            );
        }

        Some(sample)
    }

    /// Most recent sample
    #[must_use]
    pub fn latest(&self) -> Option<LatencySample> {
        self.samples.last().copied()
    }

    /// Arithmetic mean of all samples this session
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        let count = u32::try_from(self.samples.len()).ok().filter(|&n| n > 0)?;
        Some(self.total / count)
    }

    /// All samples in recording order
    #[must_use]
    pub fn samples(&self) -> &[LatencySample] {
        &self.samples
    }

    /// Current statistics, if any sample has been recorded
    #[must_use]
    pub fn report(&self) -> Option<LatencyReport> {
        let latest = self.latest()?;
        #[allow(clippy::cast_precision_loss)]
        let mean_ms = self.total.as_secs_f64() * 1000.0 / self.samples.len() as f64;
        Some(LatencyReport {
            latest_ms: latest.as_millis(),
            mean_ms,
            samples: self.samples.len(),
        })
    }

    /// Forget everything; used when a new session starts
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
