//! Audio capture from microphone
//!
//! The device callback downmixes to mono, resamples to the session rate when
//! the device cannot run at it, and cuts the stream into fixed-size frames
//! that are handed to the session event queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::codec::INPUT_SAMPLE_RATE;
use super::resample::StreamResampler;
use crate::{Error, Result};

/// Samples per capture frame
pub const FRAME_SIZE: usize = 4096;

/// Capture parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Rate frames are delivered at
    pub sample_rate: u32,
    /// Samples per frame
    pub frame_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: INPUT_SAMPLE_RATE,
            frame_size: FRAME_SIZE,
        }
    }
}

/// One fixed-length block of mono microphone samples
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFrame {
    /// Position of this frame in capture order
    pub sequence: u64,
    pub samples: Vec<f32>,
}

/// Mute switch shared between the control surface and the session
///
/// Muting gates transmission only; the microphone keeps running.
#[derive(Debug, Clone, Default)]
pub struct MuteGate {
    muted: Arc<AtomicBool>,
}

impl MuteGate {
    #[must_use]
    pub fn new(muted: bool) -> Self {
        Self {
            muted: Arc::new(AtomicBool::new(muted)),
        }
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn set(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    /// Flip the gate, returning the new value
    pub fn toggle(&self) -> bool {
        !self.muted.fetch_xor(true, Ordering::AcqRel)
    }
}

/// Cuts a sample stream into fixed-size frames
#[derive(Debug)]
pub struct Framer {
    frame_size: usize,
    pending: Vec<f32>,
    sequence: u64,
}

impl Framer {
    #[must_use]
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
            sequence: 0,
        }
    }

    /// Buffer `samples`, emitting every completed frame in order
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(CaptureFrame)) {
        while !samples.is_empty() {
            let room = self.frame_size - self.pending.len();
            let take = room.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.frame_size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                emit(CaptureFrame {
                    sequence: self.sequence,
                    samples: full,
                });
                self.sequence += 1;
            }
        }
    }

    /// Samples waiting for the current frame to fill
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Exclusive handle on the default input device
///
/// The device is released when the handle is dropped.
pub struct AudioCapture {
    stream: Option<Stream>,
    device_name: String,
    device_rate: u32,
    channels: u16,
}

impl AudioCapture {
    /// Open the default microphone and start delivering frames
    ///
    /// # Errors
    ///
    /// Returns `Acquisition` if no usable input device can be opened
    pub fn open(config: &CaptureConfig, frames: mpsc::UnboundedSender<CaptureFrame>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Acquisition("no input device available".to_string()))?;
        let device_name = device.name().unwrap_or_default();

        let stream_config = preferred_input_config(&device, config.sample_rate)?;
        let device_rate = stream_config.sample_rate.0;
        let channels = stream_config.channels.max(1);

        let mut resampler = if device_rate == config.sample_rate {
            None
        } else {
            Some(StreamResampler::new(device_rate, config.sample_rate)?)
        };
        let mut framer = Framer::new(config.frame_size);
        let mut mono = Vec::new();
        let mut resampled = Vec::new();
        let step = usize::from(channels);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    mono.clear();
                    if step == 1 {
                        mono.extend_from_slice(data);
                    } else {
                        #[allow(clippy::cast_precision_loss)]
                        mono.extend(
                            data.chunks_exact(step)
                                .map(|f| f.iter().sum::<f32>() / step as f32),
                        );
                    }

                    let block: &[f32] = match resampler.as_mut() {
                        Some(r) => {
                            resampled.clear();
                            if let Err(e) = r.push(&mono, &mut resampled) {
                                tracing::error!(error = %e, "capture resample failed");
                                return;
                            }
                            &resampled
                        }
                        None => &mono,
                    };

                    framer.push(block, |frame| {
                        // Receiver is gone once the session tears down
                        let _ = frames.send(frame);
                    });
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Acquisition(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::Acquisition(e.to_string()))?;

        tracing::debug!(
            device = %device_name,
            device_rate,
            channels,
            target_rate = config.sample_rate,
            frame_size = config.frame_size,
            "audio capture started"
        );

        Ok(Self {
            stream: Some(stream),
            device_name,
            device_rate,
            channels,
        })
    }

    /// Stop capturing and release the device
    pub fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!(device = %self.device_name, "audio capture stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Native rate the device runs at
    #[must_use]
    pub const fn device_sample_rate(&self) -> u32 {
        self.device_rate
    }

    #[must_use]
    pub const fn device_channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.release();
    }
}

/// Prefer a mono config at `rate`, else fall back to the device default
fn preferred_input_config(device: &cpal::Device, rate: u32) -> Result<StreamConfig> {
    let exact = device
        .supported_input_configs()
        .map_err(|e| Error::Acquisition(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(rate)
                && c.max_sample_rate() >= SampleRate(rate)
        });

    if let Some(range) = exact {
        return Ok(range.with_sample_rate(SampleRate(rate)).config());
    }

    let fallback = device
        .default_input_config()
        .map_err(|e| Error::Acquisition(e.to_string()))?;
    tracing::debug!(
        sample_rate = fallback.sample_rate().0,
        channels = fallback.channels(),
        "no native {rate} Hz mono input, resampling"
    );
    Ok(fallback.config())
}
