//! Audio capture from microphone

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait};

use super::AudioSource;
use super::codec;
use super::device::{StreamKeeper, device_name, find_config};
use super::resample;
use crate::{Error, Result};

/// Captures audio from the default input device
///
/// The stream runs from [`AudioCapture::open`] until [`AudioSource::release`]
/// or drop. Samples accumulate in a shared buffer drained by
/// [`AudioSource::take_samples`].
pub struct AudioCapture {
    sample_rate: u32,
    buffer: Arc<Mutex<Vec<f32>>>,
    fault: Arc<Mutex<Option<String>>>,
    keeper: Option<StreamKeeper>,
}

impl AudioCapture {
    /// Open the default input device and start capturing
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if there is no usable input device. A device
    /// that cannot run at `sample_rate` is converted to it.
    pub fn open(sample_rate: u32) -> Result<Self> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let fault = Arc::new(Mutex::new(None));

        let stream_buffer = Arc::clone(&buffer);
        let stream_fault = Arc::clone(&fault);
        let callback_fault = Arc::clone(&fault);

        let keeper = StreamKeeper::spawn("voxlink-capture", move || {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

            let config = find_config(
                || device.supported_input_configs().ok(),
                device.default_input_config().ok(),
                sample_rate,
            )
            .ok_or_else(|| Error::DeviceUnavailable("no suitable input config found".to_string()))?;
            let channels = usize::from(config.channels);
            let device_rate = config.sample_rate.0;
            let mut converter = resample::bridge(device_rate, sample_rate)?;

            tracing::debug!(
                device = device_name(&device),
                sample_rate,
                device_rate,
                channels,
                "audio capture initialized"
            );

            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        // Downmix interleaved frames to mono
                        #[allow(clippy::cast_precision_loss)]
                        let mono: Vec<f32> = if channels == 1 {
                            data.to_vec()
                        } else {
                            data.chunks(channels)
                                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                                .collect()
                        };

                        let samples = match converter.as_mut() {
                            Some(converter) => match converter.process(&mono) {
                                Ok(converted) => converted,
                                Err(e) => {
                                    if let Ok(mut slot) = callback_fault.lock() {
                                        *slot = Some(e.to_string());
                                    }
                                    return;
                                }
                            },
                            None => mono,
                        };

                        if let Ok(mut buf) = stream_buffer.lock() {
                            buf.extend_from_slice(&samples);
                        }
                    },
                    move |err| {
                        tracing::error!(error = %err, "audio capture error");
                        if let Ok(mut slot) = stream_fault.lock() {
                            *slot = Some(err.to_string());
                        }
                    },
                    None,
                )
                .map_err(|e| Error::DeviceUnavailable(e.to_string()))
        })?;

        tracing::debug!("audio capture started");

        Ok(Self {
            sample_rate,
            buffer,
            fault,
            keeper: Some(keeper),
        })
    }

    /// Clear the audio buffer
    pub fn clear_buffer(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }
}

impl AudioSource for AudioCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn take_samples(&mut self) -> Result<Vec<f32>> {
        if let Some(fault) = self.fault.lock().ok().and_then(|mut f| f.take()) {
            return Err(Error::Audio(fault));
        }

        Ok(self
            .buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default())
    }

    fn release(&mut self) {
        if let Some(mut keeper) = self.keeper.take() {
            keeper.release();
            self.clear_buffer();
            tracing::debug!("audio capture stopped");
        }
    }

    fn is_released(&self) -> bool {
        self.keeper.is_none()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.release();
    }
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(codec::encode_sample(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
