//! Output amplitude monitor
//!
//! Taps the rendered playback signal and republishes a smoothed loudness
//! scalar for visualization. Mirrors a browser analyser node: Blackman
//! window, magnitude spectrum with exponential smoothing, decibels mapped
//! onto `0..=255` per bin, then averaged across bins.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Default analyser window (yields 128 frequency bins)
pub const DEFAULT_FFT_SIZE: usize = 256;

/// Largest analyser window accepted by configuration
///
/// The spectrum is a direct DFT costing `fft_size² / 2` multiply-adds per
/// reading, about 2M at this size.
pub const MAX_FFT_SIZE: usize = 2_048;

/// Weight given to the previous magnitude when smoothing
const SMOOTHING: f32 = 0.8;

/// Decibel value mapped to byte 0
const MIN_DB: f32 = -100.0;

/// Decibel value mapped to byte 255
const MAX_DB: f32 = -30.0;

/// Latest published amplitude, readable from any thread without blocking
#[derive(Debug, Clone)]
pub struct AmplitudeLevel {
    bits: Arc<AtomicU32>,
}

impl AmplitudeLevel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU32::new(0.0_f32.to_bits())),
        }
    }

    pub fn set(&self, level: f32) {
        self.bits.store(level.to_bits(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl Default for AmplitudeLevel {
    fn default() -> Self {
        Self::new()
    }
}

/// Ring of the most recently rendered output samples
///
/// The output device pushes every rendered block; the monitor snapshots it.
#[derive(Debug, Clone)]
pub struct SignalTap {
    ring: Arc<Mutex<VecDeque<f32>>>,
    capacity: usize,
}

impl SignalTap {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Arc::new(Mutex::new(VecDeque::from(vec![0.0; capacity]))),
            capacity,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append rendered samples, discarding the oldest beyond capacity
    pub fn push(&self, samples: &[f32]) {
        let Ok(mut ring) = self.ring.lock() else {
            return;
        };
        let skip = samples.len().saturating_sub(self.capacity);
        ring.extend(samples.iter().skip(skip));
        let excess = ring.len().saturating_sub(self.capacity);
        ring.drain(..excess);
    }

    /// Copy the latest samples into `out`, oldest first
    pub fn snapshot(&self, out: &mut [f32]) {
        out.fill(0.0);
        let Ok(ring) = self.ring.lock() else {
            return;
        };
        let take = out.len().min(ring.len());
        let offset = out.len() - take;
        for (slot, sample) in out[offset..].iter_mut().zip(ring.iter().skip(ring.len() - take)) {
            *slot = *sample;
        }
    }

    /// Reset the tap to silence
    pub fn clear(&self) {
        if let Ok(mut ring) = self.ring.lock() {
            ring.iter_mut().for_each(|s| *s = 0.0);
        }
    }
}

/// Computes loudness from a [`SignalTap`] and publishes it
///
/// Each reading runs a direct DFT over the window, quadratic in its size,
/// on the session task. Keep the window at or below [`MAX_FFT_SIZE`].
pub struct AmplitudeMonitor {
    tap: SignalTap,
    level: AmplitudeLevel,
    fft_size: usize,
    window: Vec<f32>,
    cos_table: Vec<f32>,
    sin_table: Vec<f32>,
    smoothed: Vec<f32>,
    frame: Vec<f32>,
    bytes: Vec<u8>,
}

impl AmplitudeMonitor {
    /// Create a monitor reading `fft_size` samples per tick
    ///
    /// `fft_size` is expected to be a power of two (validated by config).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(tap: SignalTap, fft_size: usize, level: AmplitudeLevel) -> Self {
        let n = fft_size.max(2);
        let window = (0..n)
            .map(|i| {
                let x = 2.0 * PI * i as f32 / n as f32;
                0.08f32.mul_add((2.0 * x).cos(), 0.5f32.mul_add(-x.cos(), 0.42))
            })
            .collect();
        let cos_table = (0..n).map(|i| (2.0 * PI * i as f32 / n as f32).cos()).collect();
        let sin_table = (0..n).map(|i| (2.0 * PI * i as f32 / n as f32).sin()).collect();

        Self {
            tap,
            level,
            fft_size: n,
            window,
            cos_table,
            sin_table,
            smoothed: vec![0.0; n / 2],
            frame: vec![0.0; n],
            bytes: vec![0; n / 2],
        }
    }

    /// Number of frequency bins averaged per tick
    #[must_use]
    pub const fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Handle the monitor publishes to
    #[must_use]
    pub fn level(&self) -> AmplitudeLevel {
        self.level.clone()
    }

    /// Sample the tap once, publish the average bin energy and return it
    #[allow(clippy::cast_precision_loss)]
    pub fn tick(&mut self) -> f32 {
        self.refresh_frequency_data();
        let sum: u32 = self.bytes.iter().map(|&b| u32::from(b)).sum();
        let average = sum as f32 / self.bytes.len() as f32;
        self.level.set(average);
        average
    }

    /// Byte-scaled magnitude per bin from the most recent tick
    #[must_use]
    pub fn frequency_data(&self) -> &[u8] {
        &self.bytes
    }

    /// Forget smoothing history and publish silence
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
        self.bytes.fill(0);
        self.level.set(0.0);
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn refresh_frequency_data(&mut self) {
        self.tap.snapshot(&mut self.frame);
        for (sample, w) in self.frame.iter_mut().zip(&self.window) {
            *sample *= w;
        }

        let n = self.fft_size;
        let scale = 255.0 / (MAX_DB - MIN_DB);
        for k in 0..n / 2 {
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (i, &x) in self.frame.iter().enumerate() {
                let idx = (k * i) % n;
                re = x.mul_add(self.cos_table[idx], re);
                im = (-x).mul_add(self.sin_table[idx], im);
            }
            let magnitude = re.hypot(im) / n as f32;
            let smoothed = SMOOTHING.mul_add(self.smoothed[k], (1.0 - SMOOTHING) * magnitude);
            self.smoothed[k] = if smoothed.is_finite() { smoothed } else { 0.0 };

            let db = 20.0 * self.smoothed[k].log10();
            self.bytes[k] = if db.is_finite() {
                (scale * (db - MIN_DB)).clamp(0.0, 255.0) as u8
            } else {
                0
            };
        }
    }
}
