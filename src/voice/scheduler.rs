//! Gapless playback scheduling
//!
//! Each inbound chunk is placed on the output clock at
//! `max(next_start, now)`, so chunks that arrive ahead of playback line up
//! back-to-back and chunks that arrive late start immediately.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::clock::OutputClock;

/// Handle identifying one scheduled playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackId(u64);

impl PlaybackId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A chunk placed on the output clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledPlayback {
    pub id: PlaybackId,
    /// Output clock time at which playback begins
    pub start: Duration,
    /// Output clock time at which playback ends
    pub end: Duration,
}

impl ScheduledPlayback {
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// FIFO scheduler of playback entries on a shared output clock
pub struct PlaybackScheduler {
    clock: Arc<dyn OutputClock>,
    next_start: Duration,
    active: VecDeque<ScheduledPlayback>,
    next_id: u64,
}

impl PlaybackScheduler {
    /// Create a scheduler whose cursor starts at the clock's current time
    #[must_use]
    pub fn new(clock: Arc<dyn OutputClock>) -> Self {
        let next_start = clock.now();
        Self {
            clock,
            next_start,
            active: VecDeque::new(),
            next_id: 0,
        }
    }

    /// Current output clock time
    #[must_use]
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Cursor where the next chunk will start if it arrives in time
    #[must_use]
    pub const fn next_start_time(&self) -> Duration {
        self.next_start
    }

    /// Entries currently playing or queued, ordered by start time
    pub fn active(&self) -> impl ExactSizeIterator<Item = &ScheduledPlayback> {
        self.active.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Place a chunk of `duration` on the output clock
    ///
    /// Entries never overlap and keep arrival order, including when two
    /// chunks land on the same clock instant.
    pub fn schedule(&mut self, duration: Duration) -> ScheduledPlayback {
        let start = self.next_start.max(self.clock.now());
        let end = start + duration;
        let entry = ScheduledPlayback {
            id: PlaybackId(self.next_id),
            start,
            end,
        };
        self.next_id += 1;
        self.next_start = end;
        self.active.push_back(entry);

        tracing::trace!(
            id = %entry.id,
            start_ms = start.as_millis(),
            end_ms = end.as_millis(),
            queued = self.active.len(),
            "scheduled playback"
        );

        entry
    }

    /// Remove an entry whose playback finished
    ///
    /// Returns false for ids that are not active (already interrupted).
    pub fn complete(&mut self, id: PlaybackId) -> bool {
        let Some(index) = self.active.iter().position(|e| e.id == id) else {
            return false;
        };
        self.active.remove(index);
        true
    }

    /// Cancel every scheduled entry and reset the cursor
    ///
    /// Returns the cancelled ids in schedule order so the caller can stop
    /// them on the output device. Safe to call when nothing is scheduled.
    pub fn interrupt_all(&mut self) -> Vec<PlaybackId> {
        let cancelled: Vec<PlaybackId> = self.active.drain(..).map(|e| e.id).collect();
        self.next_start = Duration::ZERO;

        if !cancelled.is_empty() {
            tracing::debug!(cancelled = cancelled.len(), "playback interrupted");
        }

        cancelled
    }
}

impl fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("next_start", &self.next_start)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}
