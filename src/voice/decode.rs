//! Inbound audio decode pipeline
//!
//! Turns the remote endpoint's 16-bit PCM payloads into playable buffers.

use std::sync::Arc;
use std::time::Duration;

use super::codec::i16_to_sample;
use crate::{Error, Result};

/// Sample rate of synthesized speech from the remote endpoint
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A decoded block of audio ready to be scheduled for playback
///
/// Samples are interleaved when `channels > 1`. Cloning is cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Wrap interleaved samples
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the rate or channel count is zero
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::Decode("sample rate must be non-zero".to_string()));
        }
        if channels == 0 {
            return Err(Error::Decode("channel count must be non-zero".to_string()));
        }
        Ok(Self {
            samples: samples.into(),
            sample_rate,
            channels,
        })
    }

    /// Interleaved samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Shared handle to the interleaved samples
    #[must_use]
    pub fn shared_samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames (one sample per channel)
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    /// Playback duration: `frames / sample_rate`
    #[must_use]
    pub fn duration(&self) -> Duration {
        frames_to_duration(self.frames() as u64, self.sample_rate)
    }

    /// Mono mixdown of the buffer
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels == 1 {
            return self.samples.to_vec();
        }
        let channels = usize::from(self.channels);
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// One decoded segment of synthesized speech, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub struct InboundChunk {
    /// Arrival position within the session
    pub sequence: u64,
    /// Playable audio
    pub buffer: AudioBuffer,
}

impl InboundChunk {
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.buffer.duration()
    }
}

/// Interpret little-endian 16-bit PCM as a playable buffer
///
/// Trailing samples that do not fill a whole frame are ignored.
///
/// # Errors
///
/// Returns `Decode` on an odd byte count or a zero rate/channel count
pub fn decode_to_buffer(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioBuffer> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "truncated 16-bit PCM: {} bytes",
            bytes.len()
        )));
    }
    if channels == 0 {
        return Err(Error::Decode("channel count must be non-zero".to_string()));
    }

    let frames = bytes.len() / 2 / usize::from(channels);
    let samples = bytes
        .chunks_exact(2)
        .take(frames * usize::from(channels))
        .map(|pair| i16_to_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect();

    AudioBuffer::new(samples, sample_rate, channels)
}

/// Convert a frame count at `sample_rate` into a duration
#[must_use]
pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let rate = u64::from(sample_rate);
    let secs = frames / rate;
    let rem = frames % rate;
    Duration::from_secs(secs) + Duration::from_nanos(rem * NANOS_PER_SEC / rate)
}

/// Convert a duration into the nearest frame count at `sample_rate`
///
/// Inverse of [`frames_to_duration`] for every whole frame count.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn duration_to_frames(duration: Duration, sample_rate: u32) -> u64 {
    let nanos_per_sec = u128::from(NANOS_PER_SEC);
    ((duration.as_nanos() * u128::from(sample_rate) + nanos_per_sec / 2) / nanos_per_sec) as u64
}
