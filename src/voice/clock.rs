//! Output clock abstraction
//!
//! Playback is scheduled against the output device's own clock rather than
//! wall time. The clock starts at zero when the output context is opened.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::decode::frames_to_duration;

/// Monotonic time reference of an audio output device
pub trait OutputClock: Send + Sync {
    /// Current position of the output clock
    fn now(&self) -> Duration;
}

/// Device clock driven by the number of frames the output callback rendered
#[derive(Debug, Clone)]
pub struct FrameClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl FrameClock {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate,
        }
    }

    /// Frames rendered so far
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Advance after rendering `frames` frames, returning the new position
    pub fn advance(&self, frames: u64) -> u64 {
        self.frames.fetch_add(frames, Ordering::AcqRel) + frames
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl OutputClock for FrameClock {
    fn now(&self) -> Duration {
        frames_to_duration(self.frames(), self.sample_rate)
    }
}

/// Clock that only moves when told to
///
/// Used to drive the scheduler deterministically without audio hardware.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn set(&self, at: Duration) {
        self.nanos.store(at.as_nanos() as u64, Ordering::Release);
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::AcqRel);
    }
}

impl OutputClock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_clock_tracks_rendered_frames() {
        let clock = FrameClock::new(24_000);
        assert_eq!(clock.now(), Duration::ZERO);
        assert_eq!(clock.advance(12_000), 12_000);
        assert_eq!(clock.now(), Duration::from_millis(500));
    }

    #[test]
    fn frame_clock_clones_share_position() {
        let clock = FrameClock::new(48_000);
        let other = clock.clone();
        clock.advance(480);
        assert_eq!(other.now(), Duration::from_millis(10));
    }

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), Duration::from_millis(250));
        clock.set(Duration::from_secs(2));
        assert_eq!(clock.now(), Duration::from_secs(2));
    }
}
