//! Audio playback to speakers
//!
//! The output callback owns the device clock: every rendered frame advances
//! it. Scheduled entries are mixed in at their start frame, the rendered
//! signal feeds the analyser tap, and finished entries are reported back to
//! the session so the scheduler can drop them.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::clock::FrameClock;
use super::decode::{AudioBuffer, OUTPUT_SAMPLE_RATE, duration_to_frames};
use super::monitor::{DEFAULT_FFT_SIZE, SignalTap};
use super::resample::resample;
use super::scheduler::{PlaybackId, ScheduledPlayback};
use crate::{Error, Result};

/// Output parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfig {
    /// Preferred device rate (rate of inbound speech)
    pub sample_rate: u32,
    /// Samples kept for the analyser tap
    pub fft_size: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            fft_size: DEFAULT_FFT_SIZE,
        }
    }
}

/// One entry placed on the device timeline
#[derive(Debug)]
struct Voice {
    id: PlaybackId,
    start_frame: u64,
    samples: Arc<[f32]>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mono mix of scheduled entries at device rate
///
/// Shared between the session (which starts and stops entries) and the
/// output callback (which renders).
#[derive(Debug)]
pub struct Timeline {
    voices: Vec<Voice>,
    clock: FrameClock,
    tap: SignalTap,
    ended: mpsc::UnboundedSender<PlaybackId>,
    scratch: Vec<f32>,
}

impl Timeline {
    #[must_use]
    pub const fn new(
        clock: FrameClock,
        tap: SignalTap,
        ended: mpsc::UnboundedSender<PlaybackId>,
    ) -> Self {
        Self {
            voices: Vec::new(),
            clock,
            tap,
            ended,
            scratch: Vec::new(),
        }
    }

    /// Place mono samples at the entry's start time
    ///
    /// A start time the device has already rendered past plays from the
    /// first sample at the current frame.
    pub fn start(&mut self, entry: &ScheduledPlayback, samples: Arc<[f32]>) {
        let scheduled = duration_to_frames(entry.start, self.clock.sample_rate());
        let start_frame = scheduled.max(self.clock.frames());
        self.voices.push(Voice {
            id: entry.id,
            start_frame,
            samples,
        });
    }

    /// Remove an entry immediately, mid-sample if it is playing
    pub fn stop(&mut self, id: PlaybackId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        before != self.voices.len()
    }

    /// Drop every entry without reporting completion
    pub fn clear(&mut self) {
        self.voices.clear();
        self.tap.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.voices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Render one interleaved block and advance the clock
    ///
    /// The mono mix is copied to every channel.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        let origin = self.clock.frames();

        self.scratch.clear();
        self.scratch.resize(frames, 0.0);
        for voice in &self.voices {
            let end = voice.end_frame();
            for (i, slot) in self.scratch.iter_mut().enumerate() {
                let position = origin + i as u64;
                if position >= voice.start_frame && position < end {
                    #[allow(clippy::cast_possible_truncation)]
                    let offset = (position - voice.start_frame) as usize;
                    *slot += voice.samples[offset];
                }
            }
        }

        for (frame, &sample) in out.chunks_mut(channels).zip(&self.scratch) {
            frame.fill(sample.clamp(-1.0, 1.0));
        }
        self.tap.push(&self.scratch);

        let now = self.clock.advance(frames as u64);
        let ended = &self.ended;
        self.voices.retain(|voice| {
            if voice.end_frame() <= now {
                let _ = ended.send(voice.id);
                false
            } else {
                true
            }
        });
    }
}

/// Output context on the default output device
///
/// Dropping it stops the stream.
pub struct AudioPlayback {
    stream: Option<Stream>,
    timeline: Arc<Mutex<Timeline>>,
    clock: FrameClock,
    tap: SignalTap,
    device_rate: u32,
}

impl AudioPlayback {
    /// Open the default output device and start its clock
    ///
    /// # Errors
    ///
    /// Returns `Acquisition` if audio device cannot be opened
    pub fn open(config: &OutputConfig, ended: mpsc::UnboundedSender<PlaybackId>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Acquisition("no output device available".to_string()))?;

        let stream_config = preferred_output_config(&device, config.sample_rate)?;
        let device_rate = stream_config.sample_rate.0;
        let channels = usize::from(stream_config.channels);

        let clock = FrameClock::new(device_rate);
        let tap = SignalTap::new(config.fft_size);
        let timeline = Arc::new(Mutex::new(Timeline::new(clock.clone(), tap.clone(), ended)));

        let render_timeline = Arc::clone(&timeline);
        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    match render_timeline.lock() {
                        Ok(mut timeline) => timeline.render(data, channels),
                        Err(_) => data.fill(0.0),
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Acquisition(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::Acquisition(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = device_rate,
            channels,
            "audio playback initialized"
        );

        Ok(Self {
            stream: Some(stream),
            timeline,
            clock,
            tap,
            device_rate,
        })
    }

    /// Device clock
    #[must_use]
    pub fn clock(&self) -> FrameClock {
        self.clock.clone()
    }

    /// Tap on the rendered output
    #[must_use]
    pub fn tap(&self) -> SignalTap {
        self.tap.clone()
    }

    #[must_use]
    pub const fn device_sample_rate(&self) -> u32 {
        self.device_rate
    }

    /// Queue a decoded buffer at its scheduled time
    ///
    /// # Errors
    ///
    /// Returns error if the buffer cannot be converted to the device rate
    pub fn start(&self, entry: &ScheduledPlayback, buffer: &AudioBuffer) -> Result<()> {
        let mono = buffer.to_mono();
        let samples: Arc<[f32]> = if buffer.sample_rate() == self.device_rate {
            mono.into()
        } else {
            resample(&mono, buffer.sample_rate(), self.device_rate)?.into()
        };

        self.timeline
            .lock()
            .map_err(|_| Error::Audio("playback timeline poisoned".to_string()))?
            .start(entry, samples);
        Ok(())
    }

    /// Stop an entry immediately
    pub fn stop(&self, id: PlaybackId) {
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.stop(id);
        }
    }

    /// Stop the stream and drop every queued entry
    pub fn close(&mut self) {
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.clear();
        }
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio playback closed");
        }
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

/// Prefer mono, then stereo, at `rate`; else the device default
fn preferred_output_config(device: &cpal::Device, rate: u32) -> Result<StreamConfig> {
    let supports = |channels: u16| -> Result<Option<StreamConfig>> {
        Ok(device
            .supported_output_configs()
            .map_err(|e| Error::Acquisition(e.to_string()))?
            .find(|c| {
                c.channels() == channels
                    && c.sample_format() == cpal::SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(rate)
                    && c.max_sample_rate() >= SampleRate(rate)
            })
            .map(|c| c.with_sample_rate(SampleRate(rate)).config()))
    };

    if let Some(config) = supports(1)? {
        return Ok(config);
    }
    // Fallback: try stereo
    if let Some(config) = supports(2)? {
        return Ok(config);
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| Error::Acquisition(e.to_string()))?;
    tracing::debug!(
        sample_rate = fallback.sample_rate().0,
        channels = fallback.channels(),
        "no native {rate} Hz output, resampling"
    );
    Ok(fallback.config())
}
