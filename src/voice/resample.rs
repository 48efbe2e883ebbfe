//! Sample-rate conversion for devices that cannot run at the session rates
//!
//! Capture resamples device audio to 16 kHz as it streams in; playback
//! converts each 24 kHz chunk to the output device rate when it is started,
//! with the filter latency trimmed so chunks still meet end to end.

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Input frames consumed per resampler pass
const CHUNK_FRAMES: usize = 1024;

/// Sub-chunks used by the FFT resampler
const SUB_CHUNKS: usize = 2;

/// Streaming mono resampler
///
/// Input arrives in arbitrary block sizes; output is produced whenever a
/// full internal chunk has accumulated.
pub struct StreamResampler {
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
    from_rate: u32,
    to_rate: u32,
}

impl StreamResampler {
    /// Create a resampler from `from_rate` to `to_rate`
    ///
    /// Equal rates pass samples through untouched.
    ///
    /// # Errors
    ///
    /// Returns error if either rate is zero or the resampler cannot be built
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(Error::Audio(format!(
                "invalid resample rates {from_rate} -> {to_rate}"
            )));
        }

        let inner = if from_rate == to_rate {
            None
        } else {
            let resampler = FftFixedIn::<f32>::new(
                from_rate as usize,
                to_rate as usize,
                CHUNK_FRAMES,
                SUB_CHUNKS,
                1,
            )
            .map_err(|e| Error::Audio(format!("failed to build resampler: {e}")))?;
            tracing::debug!(from_rate, to_rate, "resampler initialized");
            Some(resampler)
        };

        Ok(Self {
            inner,
            pending: Vec::with_capacity(CHUNK_FRAMES * 2),
            from_rate,
            to_rate,
        })
    }

    #[must_use]
    pub const fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    #[must_use]
    pub const fn rates(&self) -> (u32, u32) {
        (self.from_rate, self.to_rate)
    }

    /// Output frames of filter latency before the first input sample appears
    #[must_use]
    pub fn output_delay(&self) -> usize {
        self.inner.as_ref().map_or(0, Resampler::output_delay)
    }

    /// Feed samples, appending any converted output to `out`
    ///
    /// # Errors
    ///
    /// Returns error if the resampler rejects the input
    pub fn push(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        let Some(inner) = self.inner.as_mut() else {
            out.extend_from_slice(input);
            return Ok(());
        };

        self.pending.extend_from_slice(input);
        loop {
            let needed = inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let produced = inner
                .process(std::slice::from_ref(&chunk), None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            if let Some(channel) = produced.first() {
                out.extend_from_slice(channel);
            }
        }
        Ok(())
    }

    /// Flush buffered input, padding the final partial chunk
    ///
    /// # Errors
    ///
    /// Returns error if the resampler rejects the input
    pub fn finish(&mut self, out: &mut Vec<f32>) -> Result<()> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(());
        };
        if self.pending.is_empty() {
            return Ok(());
        }
        let partial = std::mem::take(&mut self.pending);
        let produced = inner
            .process_partial(Some(std::slice::from_ref(&partial)), None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        if let Some(channel) = produced.first() {
            out.extend_from_slice(channel);
        }
        Ok(())
    }
}

/// Number of output samples a one-shot conversion should produce
#[must_use]
pub fn expected_len(input_len: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == 0 {
        return input_len;
    }
    let scaled = input_len as u128 * u128::from(to_rate);
    let rate = u128::from(from_rate);
    usize::try_from((scaled + rate / 2) / rate).unwrap_or(usize::MAX)
}

/// Convert a whole buffer from `from_rate` to `to_rate`
///
/// Output length is exactly `round(len * to_rate / from_rate)` and the
/// filter latency is removed, so the first output sample lines up with the
/// first input sample. Chunks converted separately stay back to back.
///
/// # Errors
///
/// Returns error if the resampler cannot be built or rejects the input
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let expected = expected_len(samples.len(), from_rate, to_rate);
    let mut resampler = StreamResampler::new(from_rate, to_rate)?;
    let delay = resampler.output_delay();
    let wanted = delay + expected;

    let mut out = Vec::with_capacity(wanted + CHUNK_FRAMES * 2);
    resampler.push(samples, &mut out)?;

    // Trailing silence flushes the partial chunk and the filter delay
    let silence = vec![0.0; CHUNK_FRAMES];
    while out.len() < wanted {
        let before = out.len();
        resampler.push(&silence, &mut out)?;
        if out.len() == before {
            break;
        }
    }

    out.drain(..delay.min(out.len()));
    out.resize(expected, 0.0);
    Ok(out)
}
