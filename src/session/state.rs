//! Connection state machine and per-event session logic
//!
//! [`SessionCore`] is the pure half of the controller: it consumes one
//! [`SessionEvent`] at a time and answers with the [`Effect`]s the
//! controller must apply to devices and the transport. It never touches
//! hardware or sockets itself.

use std::fmt;
use std::sync::Arc;

use crate::live::InboundMessage;
use crate::voice::{
    AudioBuffer, CaptureFrame, MuteGate, OutputClock, PlaybackId, PlaybackScheduler,
    ScheduledPlayback, WireFrame, decode_envelope, decode_to_buffer, encode_with_rate,
};
use crate::Result;

/// Lifecycle state of the live session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    /// Whether `connect()` is accepted from this state
    #[must_use]
    pub const fn can_connect(self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    /// Whether a session (devices and stream) exists in this state
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input processed by the session, in delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The microphone produced a frame
    CaptureReady(CaptureFrame),
    /// The remote stream delivered a message
    Remote(InboundMessage),
    /// The amplitude display wants a fresh reading
    AmplitudeTick,
    /// The output device finished an entry
    PlaybackEnded(PlaybackId),
}

/// Side effect requested by [`SessionCore::handle`]
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a frame on the remote stream
    Transmit(WireFrame),
    /// Start a decoded buffer on the output at its scheduled time
    StartPlayback {
        entry: ScheduledPlayback,
        buffer: AudioBuffer,
    },
    /// Stop an entry on the output immediately
    StopPlayback(PlaybackId),
    /// Sample the output tap and publish the amplitude
    RefreshAmplitude,
    /// Release every session resource and move to `next`
    Teardown { next: ConnectionState },
}

/// Per-session state driven one event at a time
pub struct SessionCore {
    state: ConnectionState,
    mute: MuteGate,
    scheduler: PlaybackScheduler,
    input_rate: u32,
    output_rate: u32,
    inbound_chunks: u64,
    frames_sent: u64,
    frames_muted: u64,
}

impl SessionCore {
    /// Start a session in `CONNECTING`
    #[must_use]
    pub fn new(
        mute: MuteGate,
        clock: Arc<dyn OutputClock>,
        input_rate: u32,
        output_rate: u32,
    ) -> Self {
        Self {
            state: ConnectionState::Connecting,
            mute,
            scheduler: PlaybackScheduler::new(clock),
            input_rate,
            output_rate,
            inbound_chunks: 0,
            frames_sent: 0,
            frames_muted: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub const fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    /// Frames handed to the transport so far
    #[must_use]
    pub const fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Frames dropped by the mute gate so far
    #[must_use]
    pub const fn frames_muted(&self) -> u64 {
        self.frames_muted
    }

    /// Process one event
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        match event {
            SessionEvent::CaptureReady(frame) => self.on_capture(&frame),
            SessionEvent::Remote(message) => self.on_remote(message),
            SessionEvent::AmplitudeTick => vec![Effect::RefreshAmplitude],
            SessionEvent::PlaybackEnded(id) => {
                if !self.scheduler.complete(id) {
                    tracing::warn!(id = %id, "playback ended for unknown entry");
                }
                Vec::new()
            }
        }
    }

    /// Forget an entry the output could not start
    pub fn discard(&mut self, id: PlaybackId) -> bool {
        self.scheduler.complete(id)
    }

    /// Cancel all playback ahead of teardown
    ///
    /// Returns the ids to stop on the output.
    pub fn shutdown(&mut self) -> Vec<PlaybackId> {
        self.scheduler.interrupt_all()
    }

    fn on_capture(&mut self, frame: &CaptureFrame) -> Vec<Effect> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        if self.mute.is_muted() {
            self.frames_muted += 1;
            return Vec::new();
        }

        self.frames_sent += 1;
        tracing::trace!(sequence = frame.sequence, samples = frame.samples.len(), "transmit frame");
        vec![Effect::Transmit(encode_with_rate(
            &frame.samples,
            self.input_rate,
        ))]
    }

    fn on_remote(&mut self, message: InboundMessage) -> Vec<Effect> {
        match message {
            InboundMessage::Opened => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Connected;
                } else {
                    tracing::debug!(state = %self.state, "ignoring repeated open acknowledgement");
                }
                Vec::new()
            }
            InboundMessage::AudioDelivery { data } => match self.decode(&data) {
                Ok(buffer) => {
                    let entry = self.scheduler.schedule(buffer.duration());
                    self.inbound_chunks += 1;
                    vec![Effect::StartPlayback { entry, buffer }]
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping inbound audio chunk");
                    Vec::new()
                }
            },
            InboundMessage::Interrupted => {
                let cancelled = self.scheduler.interrupt_all();
                tracing::debug!(cancelled = cancelled.len(), "model interrupted");
                cancelled.into_iter().map(Effect::StopPlayback).collect()
            }
            InboundMessage::TurnComplete => {
                tracing::debug!(chunks = self.inbound_chunks, "model turn complete");
                Vec::new()
            }
            InboundMessage::Closed { reason } => {
                tracing::info!(reason = ?reason, "remote stream closed");
                vec![Effect::Teardown {
                    next: ConnectionState::Disconnected,
                }]
            }
            InboundMessage::Error(message) => {
                tracing::error!(error = %message, "remote stream error");
                self.state = ConnectionState::Error;
                vec![Effect::Teardown {
                    next: ConnectionState::Error,
                }]
            }
        }
    }

    fn decode(&self, data: &str) -> Result<AudioBuffer> {
        let bytes = decode_envelope(data)?;
        decode_to_buffer(&bytes, self.output_rate, 1)
    }
}

impl fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCore")
            .field("state", &self.state)
            .field("scheduler", &self.scheduler)
            .field("frames_sent", &self.frames_sent)
            .finish_non_exhaustive()
    }
}
