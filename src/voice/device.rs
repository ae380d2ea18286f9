//! System audio devices via cpal
//!
//! cpal streams are not `Send`, so each stream lives on a keeper thread for
//! the lifetime of its handle. The engine only touches the shared buffers.

use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::SampleRate;
use cpal::traits::{DeviceTrait, StreamTrait};

use super::{AudioCapture, AudioDevices, AudioPlayback, AudioSink, AudioSource};
use crate::{Error, Result};

/// Owns a running cpal stream on a dedicated thread
pub(crate) struct StreamKeeper {
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamKeeper {
    /// Build and start a stream on a new thread, waiting until it is playing
    pub(crate) fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build().and_then(|stream| {
                    stream
                        .play()
                        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
                    Ok(stream)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = ready_tx.send(Ok(()));

                // Blocks until release() or the keeper is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shutdown: Some(shutdown_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::DeviceUnavailable(
                    "audio thread exited before the stream started".to_string(),
                ))
            }
        }
    }

    /// Stop the stream and join its thread
    pub(crate) fn release(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("audio stream thread panicked");
            }
        }
    }
}

impl Drop for StreamKeeper {
    fn drop(&mut self) {
        self.release();
    }
}

/// Pick a stream config at `sample_rate`, preferring mono over stereo
///
/// Devices that cannot run at `sample_rate` fall back to their default
/// config; the caller converts between the two rates.
pub(crate) fn find_config<I>(
    configs: impl Fn() -> Option<I>,
    default: Option<cpal::SupportedStreamConfig>,
    sample_rate: u32,
) -> Option<cpal::StreamConfig>
where
    I: Iterator<Item = cpal::SupportedStreamConfigRange>,
{
    let rate = SampleRate(sample_rate);
    let matches = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
    };

    configs()
        .and_then(|mut all| all.find(|c| matches(c, 1)))
        .or_else(|| configs()?.find(|c| matches(c, 2)))
        .map(|c| c.with_sample_rate(rate).config())
        .or_else(|| default.map(|c| c.config()))
}

/// Default host input and output devices
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAudio;

impl AudioDevices for SystemAudio {
    fn open_input(&self, sample_rate: u32) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(AudioCapture::open(sample_rate)?))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(AudioPlayback::open(sample_rate)?))
    }
}

/// Device name for logs
pub(crate) fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_default()
}
