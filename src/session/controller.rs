//! Session controller
//!
//! Owns at most one [`ActiveSession`] and drives it from a single event
//! loop: control commands, remote messages, playback completions, capture
//! frames and the amplitude ticker are all handled on one task, so session
//! state needs no locking.

use std::fmt;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

use super::devices::{DeviceProvider, Microphone, OutputContext};
use super::state::{ConnectionState, Effect, SessionCore, SessionEvent};
use crate::config::Config;
use crate::live::{InboundMessage, Transport, TransportLink};
use crate::voice::{AmplitudeLevel, AmplitudeMonitor, CaptureFrame, MuteGate, PlaybackId, ScheduledPlayback};
use crate::{Error, Result};

/// Control request sent from a [`SessionHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Connect,
    Disconnect,
    Shutdown,
}

/// Cloneable control surface for a running [`SessionController`]
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    mute: MuteGate,
    amplitude: AmplitudeLevel,
}

impl SessionHandle {
    /// Request a new session
    ///
    /// # Errors
    ///
    /// Returns `ControllerClosed` if the controller has stopped
    pub fn connect(&self) -> Result<()> {
        self.send(Command::Connect)
    }

    /// Request teardown of the current session
    ///
    /// # Errors
    ///
    /// Returns `ControllerClosed` if the controller has stopped
    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    /// Tear down and stop the controller's event loop
    ///
    /// # Errors
    ///
    /// Returns `ControllerClosed` if the controller has stopped
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.mute.is_muted()
    }

    /// Flip the mute gate, returning the new value
    ///
    /// Takes effect on the next captured frame.
    pub fn toggle_mute(&self) -> bool {
        let muted = self.mute.toggle();
        tracing::debug!(muted, "mute toggled");
        muted
    }

    pub fn set_muted(&self, muted: bool) {
        self.mute.set(muted);
        tracing::debug!(muted, "mute set");
    }

    /// Latest published output amplitude
    #[must_use]
    pub fn amplitude(&self) -> f32 {
        self.amplitude.get()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ControllerClosed)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.state())
            .field("muted", &self.is_muted())
            .finish_non_exhaustive()
    }
}

/// Everything one live session holds
///
/// Created by `connect` and consumed by `close`; never shared.
struct ActiveSession {
    id: Uuid,
    span: tracing::Span,
    core: SessionCore,
    monitor: AmplitudeMonitor,
    microphone: Box<dyn Microphone>,
    output: Box<dyn OutputContext>,
    link: Box<dyn TransportLink>,
    frames: mpsc::UnboundedReceiver<CaptureFrame>,
    inbound: mpsc::UnboundedReceiver<InboundMessage>,
    ended: mpsc::UnboundedReceiver<PlaybackId>,
    ticker: Interval,
    /// Handshake deadline while waiting for the open acknowledgement
    deadline: Option<Instant>,
}

impl ActiveSession {
    /// Cancel playback and release every resource
    fn close(mut self, next: ConnectionState) {
        let span = self.span.clone();
        let _guard = span.enter();

        for id in self.core.shutdown() {
            self.output.stop(id);
        }
        self.monitor.reset();
        self.link.close();
        self.microphone.release();
        self.output.close();

        tracing::info!(
            state = %next,
            frames_sent = self.core.frames_sent(),
            frames_muted = self.core.frames_muted(),
            "session closed"
        );
    }
}

/// What woke the event loop
enum Wake {
    Command(Option<Command>),
    Event(SessionEvent),
    HandshakeTimeout,
}

/// Drives live sessions over injected devices and transport
pub struct SessionController<D, T> {
    config: Config,
    devices: D,
    transport: T,
    mute: MuteGate,
    amplitude: AmplitudeLevel,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<Command>,
    session: Option<ActiveSession>,
}

impl<D, T> SessionController<D, T>
where
    D: DeviceProvider,
    T: Transport,
{
    /// Create a controller in `DISCONNECTED` and its control handle
    pub fn new(config: Config, devices: D, transport: T) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
        let mute = MuteGate::new(config.audio.start_muted);
        let amplitude = AmplitudeLevel::new();

        let handle = SessionHandle {
            commands: commands_tx,
            state: state_rx,
            mute: mute.clone(),
            amplitude: amplitude.clone(),
        };

        let controller = Self {
            config,
            devices,
            transport,
            mute,
            amplitude,
            state,
            commands,
            session: None,
        };

        (controller, handle)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Identifier of the active session
    #[must_use]
    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Entries playing or queued in the active session
    #[must_use]
    pub fn scheduled(&self) -> Vec<ScheduledPlayback> {
        self.session
            .as_ref()
            .map(|s| s.core.scheduler().active().copied().collect())
            .unwrap_or_default()
    }

    /// Frames transmitted by the active session
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.core.frames_sent())
    }

    #[must_use]
    pub const fn devices(&self) -> &D {
        &self.devices
    }

    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Acquire devices, open the remote stream and enter `CONNECTING`
    ///
    /// The session becomes `CONNECTED` when the open acknowledgement is
    /// processed by [`step`](Self::step).
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless `DISCONNECTED` or `ERROR`. Acquisition
    /// and transport failures release what was acquired, leave the state at
    /// `ERROR` and are returned.
    pub async fn connect(&mut self) -> Result<()> {
        let state = self.state();
        if !state.can_connect() {
            return Err(Error::InvalidState {
                operation: "connect",
                state,
            });
        }

        self.set_state(ConnectionState::Connecting);

        let id = Uuid::new_v4();
        let span = tracing::info_span!("session", session_id = %id);

        match self.open_session(id, span.clone()).instrument(span.clone()).await {
            Ok(session) => {
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                span.in_scope(|| tracing::error!(error = %e, "failed to open session"));
                self.set_state(ConnectionState::Error);
                Err(e)
            }
        }
    }

    /// Tear down the active session and enter `DISCONNECTED`
    ///
    /// Safe to call from any state and any number of times.
    pub fn disconnect(&mut self) {
        if self.session.is_some() {
            self.teardown(ConnectionState::Disconnected);
        } else {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Wait for and process one event
    ///
    /// Returns false once the controller should stop: a shutdown was
    /// requested or every handle was dropped.
    pub async fn step(&mut self) -> bool {
        let wake = next_wake(&mut self.commands, self.session.as_mut()).await;

        match wake {
            Wake::Command(Some(Command::Connect)) => {
                if let Err(e) = self.connect().await {
                    tracing::warn!(error = %e, "connect request failed");
                }
                true
            }
            Wake::Command(Some(Command::Disconnect)) => {
                self.disconnect();
                true
            }
            Wake::Command(Some(Command::Shutdown) | None) => {
                self.disconnect();
                false
            }
            Wake::HandshakeTimeout => {
                if let Some(session) = &self.session {
                    session
                        .span
                        .in_scope(|| tracing::error!("timed out waiting for session open"));
                }
                self.teardown(ConnectionState::Error);
                true
            }
            Wake::Event(event) => {
                self.dispatch(event);
                true
            }
        }
    }

    /// Run until shut down, then release any remaining session
    pub async fn run(mut self) {
        while self.step().await {}
        self.disconnect();
    }

    async fn open_session(&mut self, id: Uuid, span: tracing::Span) -> Result<ActiveSession> {
        let audio = self.config.audio.clone();

        let (ended_tx, ended) = mpsc::unbounded_channel();
        let mut output = self
            .devices
            .open_output(&self.config.output_config(), ended_tx)
            .await?;

        let (frames_tx, frames) = mpsc::unbounded_channel();
        let mut microphone = match self
            .devices
            .acquire_microphone(&self.config.capture_config(), frames_tx)
            .await
        {
            Ok(microphone) => microphone,
            Err(e) => {
                output.close();
                return Err(e);
            }
        };

        let setup = self.config.session_setup();
        let deadline = self.config.connect_timeout.map(|t| Instant::now() + t);
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        let opened = match deadline {
            Some(at) => {
                tokio::time::timeout_at(at, self.transport.open(&setup, inbound_tx))
                    .await
                    .unwrap_or_else(|_| {
                        Err(Error::Transport("timed out opening remote stream".to_string()))
                    })
            }
            None => self.transport.open(&setup, inbound_tx).await,
        };
        let link = match opened {
            Ok(link) => link,
            Err(e) => {
                microphone.release();
                output.close();
                return Err(e);
            }
        };

        let core = SessionCore::new(
            self.mute.clone(),
            output.clock(),
            audio.input_sample_rate,
            audio.output_sample_rate,
        );
        let monitor = AmplitudeMonitor::new(output.tap(), audio.fft_size, self.amplitude.clone());

        let period = audio.amplitude_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            model = %setup.model,
            voice = %setup.voice,
            muted = self.mute.is_muted(),
            "session opening"
        );

        Ok(ActiveSession {
            id,
            span,
            core,
            monitor,
            microphone,
            output,
            link,
            frames,
            inbound,
            ended,
            ticker,
            deadline,
        })
    }

    fn dispatch(&mut self, event: SessionEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let (before, after, teardown) = {
            let span = session.span.clone();
            let _guard = span.enter();

            let before = session.core.state();
            let effects = session.core.handle(event);
            let after = session.core.state();

            let mut teardown = None;
            for effect in effects {
                match effect {
                    Effect::Transmit(frame) => {
                        if let Err(e) = session.link.send(frame) {
                            tracing::error!(error = %e, "failed to transmit frame");
                            teardown = Some(ConnectionState::Error);
                            break;
                        }
                    }
                    Effect::StartPlayback { entry, buffer } => {
                        if let Err(e) = session.output.start(&entry, &buffer) {
                            tracing::warn!(error = %e, id = %entry.id, "failed to start playback");
                            session.core.discard(entry.id);
                        }
                    }
                    Effect::StopPlayback(id) => session.output.stop(id),
                    Effect::RefreshAmplitude => {
                        session.monitor.tick();
                    }
                    Effect::Teardown { next } => teardown = Some(next),
                }
            }

            if after == ConnectionState::Connected && before != after {
                session.deadline = None;
            }

            (before, after, teardown)
        };

        if let Some(next) = teardown {
            self.teardown(next);
        } else if before != after {
            self.set_state(after);
        }
    }

    fn teardown(&mut self, next: ConnectionState) {
        if let Some(session) = self.session.take() {
            session.close(next);
        }
        self.set_state(next);
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "connection state changed");
        }
    }
}

impl<D, T> Drop for SessionController<D, T> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.close(ConnectionState::Disconnected);
        }
    }
}

async fn next_wake(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    session: Option<&mut ActiveSession>,
) -> Wake {
    let Some(session) = session else {
        return Wake::Command(commands.recv().await);
    };

    let deadline = session.deadline;

    tokio::select! {
        biased;

        command = commands.recv() => Wake::Command(command),

        () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
            Wake::HandshakeTimeout
        }

        message = session.inbound.recv() => {
            // A dropped sender means the stream went away without a close frame
            let message = message.unwrap_or(InboundMessage::Closed { reason: None });
            Wake::Event(SessionEvent::Remote(message))
        }

        Some(id) = session.ended.recv() => Wake::Event(SessionEvent::PlaybackEnded(id)),

        Some(frame) = session.frames.recv() => Wake::Event(SessionEvent::CaptureReady(frame)),

        _ = session.ticker.tick() => Wake::Event(SessionEvent::AmplitudeTick),
    }
}
