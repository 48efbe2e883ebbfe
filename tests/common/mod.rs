//! Shared test utilities
//!
//! Fake devices and transport that record what the session does to them,
//! plus a rig bundling them with a controller.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::mpsc;

use elio_live::live::{InboundMessage, SessionSetup, Transport, TransportLink};
use elio_live::session::{DeviceProvider, Microphone, OutputContext, SessionController, SessionHandle};
use elio_live::voice::{
    AudioBuffer, CaptureConfig, CaptureFrame, ManualClock, OutputClock, OutputConfig, PlaybackId,
    ScheduledPlayback, SignalTap, WireFrame,
};
use elio_live::{Config, Error, Result};

/// Rate of synthesized speech
pub const OUTPUT_RATE: u32 = 24_000;

/// Everything the fake devices observed
#[derive(Debug, Default)]
pub struct DeviceLog {
    pub frames: Option<mpsc::UnboundedSender<CaptureFrame>>,
    pub ended: Option<mpsc::UnboundedSender<PlaybackId>>,
    pub started: Vec<(ScheduledPlayback, usize)>,
    pub stopped: Vec<PlaybackId>,
    pub outputs_opened: usize,
    pub outputs_closed: usize,
    pub microphones_acquired: usize,
    pub microphones_released: usize,
    pub fail_output: bool,
    pub fail_microphone: bool,
}

/// Device provider backed by a manual clock
#[derive(Clone)]
pub struct FakeDevices {
    pub log: Arc<Mutex<DeviceLog>>,
    pub clock: ManualClock,
    pub tap: SignalTap,
}

impl FakeDevices {
    pub fn new(fft_size: usize) -> Self {
        Self {
            log: Arc::default(),
            clock: ManualClock::new(),
            tap: SignalTap::new(fft_size),
        }
    }

    /// Deliver one capture callback
    pub fn capture(&self, sequence: u64) {
        let log = self.log.lock().unwrap();
        let frames = log.frames.as_ref().expect("microphone not acquired");
        frames
            .send(CaptureFrame {
                sequence,
                samples: vec![0.25; 64],
            })
            .unwrap();
    }

    /// Report an entry as finished by the output device
    pub fn finish(&self, id: PlaybackId) {
        let log = self.log.lock().unwrap();
        log.ended.as_ref().expect("output not opened").send(id).unwrap();
    }

    pub fn started(&self) -> Vec<ScheduledPlayback> {
        self.log.lock().unwrap().started.iter().map(|(e, _)| *e).collect()
    }

    pub fn stopped(&self) -> Vec<PlaybackId> {
        self.log.lock().unwrap().stopped.clone()
    }

    /// True when everything acquired has been released
    pub fn all_released(&self) -> bool {
        let log = self.log.lock().unwrap();
        log.outputs_opened == log.outputs_closed
            && log.microphones_acquired == log.microphones_released
    }
}

struct FakeMicrophone {
    log: Arc<Mutex<DeviceLog>>,
    released: bool,
}

impl Microphone for FakeMicrophone {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            let mut log = self.log.lock().unwrap();
            log.microphones_released += 1;
            log.frames = None;
        }
    }

    fn is_capturing(&self) -> bool {
        !self.released
    }
}

impl Drop for FakeMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

struct FakeOutput {
    log: Arc<Mutex<DeviceLog>>,
    clock: ManualClock,
    tap: SignalTap,
    closed: bool,
}

impl OutputContext for FakeOutput {
    fn clock(&self) -> Arc<dyn OutputClock> {
        Arc::new(self.clock.clone())
    }

    fn tap(&self) -> SignalTap {
        self.tap.clone()
    }

    fn start(&mut self, entry: &ScheduledPlayback, buffer: &AudioBuffer) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .started
            .push((*entry, buffer.frames()));
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        self.log.lock().unwrap().stopped.push(id);
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut log = self.log.lock().unwrap();
            log.outputs_closed += 1;
            log.ended = None;
        }
    }
}

impl Drop for FakeOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait(?Send)]
impl DeviceProvider for FakeDevices {
    async fn open_output(
        &mut self,
        _config: &OutputConfig,
        ended: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Box<dyn OutputContext>> {
        let mut log = self.log.lock().unwrap();
        if log.fail_output {
            return Err(Error::Acquisition("no output device".to_string()));
        }
        log.outputs_opened += 1;
        log.ended = Some(ended);
        Ok(Box::new(FakeOutput {
            log: Arc::clone(&self.log),
            clock: self.clock.clone(),
            tap: self.tap.clone(),
            closed: false,
        }))
    }

    async fn acquire_microphone(
        &mut self,
        _config: &CaptureConfig,
        frames: mpsc::UnboundedSender<CaptureFrame>,
    ) -> Result<Box<dyn Microphone>> {
        let mut log = self.log.lock().unwrap();
        if log.fail_microphone {
            return Err(Error::Acquisition("permission denied".to_string()));
        }
        log.microphones_acquired += 1;
        log.frames = Some(frames);
        Ok(Box::new(FakeMicrophone {
            log: Arc::clone(&self.log),
            released: false,
        }))
    }
}

/// How the fake transport answers `open`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    #[default]
    Succeed,
    Fail,
    Hang,
}

/// Everything the fake transport observed
#[derive(Debug, Default)]
pub struct TransportLog {
    pub inbound: Option<mpsc::UnboundedSender<InboundMessage>>,
    pub setups: Vec<SessionSetup>,
    pub sent: Vec<WireFrame>,
    pub opened: usize,
    pub closed: usize,
    pub behavior: OpenBehavior,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    pub log: Arc<Mutex<TransportLog>>,
}

impl FakeTransport {
    /// Deliver a message from the remote endpoint
    pub fn push(&self, message: InboundMessage) {
        let log = self.log.lock().unwrap();
        log.inbound
            .as_ref()
            .expect("stream not open")
            .send(message)
            .unwrap();
    }

    pub fn sent(&self) -> usize {
        self.log.lock().unwrap().sent.len()
    }

    pub fn closed(&self) -> usize {
        self.log.lock().unwrap().closed
    }
}

struct FakeLink {
    log: Arc<Mutex<TransportLog>>,
    closed: bool,
}

impl TransportLink for FakeLink {
    fn send(&mut self, frame: WireFrame) -> Result<()> {
        if self.closed {
            return Err(Error::Transport("closed".to_string()));
        }
        self.log.lock().unwrap().sent.push(frame);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.lock().unwrap().closed += 1;
        }
    }
}

#[async_trait(?Send)]
impl Transport for FakeTransport {
    async fn open(
        &mut self,
        setup: &SessionSetup,
        inbound: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<Box<dyn TransportLink>> {
        let behavior = self.log.lock().unwrap().behavior;
        match behavior {
            OpenBehavior::Fail => Err(Error::Transport("connection refused".to_string())),
            OpenBehavior::Hang => std::future::pending().await,
            OpenBehavior::Succeed => {
                let mut log = self.log.lock().unwrap();
                log.opened += 1;
                log.setups.push(setup.clone());
                log.inbound = Some(inbound);
                Ok(Box::new(FakeLink {
                    log: Arc::clone(&self.log),
                    closed: false,
                }))
            }
        }
    }
}

/// Controller wired to fakes
pub struct Rig {
    pub controller: SessionController<FakeDevices, FakeTransport>,
    pub handle: SessionHandle,
    pub devices: FakeDevices,
    pub transport: FakeTransport,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let devices = FakeDevices::new(config.audio.fft_size);
        let transport = FakeTransport::default();
        let (controller, handle) =
            SessionController::new(config, devices.clone(), transport.clone());
        Self {
            controller,
            handle,
            devices,
            transport,
        }
    }

    /// Connect and process the open acknowledgement
    pub async fn connected() -> Self {
        let mut rig = Self::new();
        rig.controller.connect().await.unwrap();
        rig.transport.push(InboundMessage::Opened);
        rig.step().await;
        rig
    }

    pub async fn step(&mut self) {
        assert!(self.controller.step().await, "controller stopped");
    }

    pub async fn steps(&mut self, n: usize) {
        for _ in 0..n {
            self.step().await;
        }
    }
}

/// Configuration with a slow amplitude ticker so steps see queued events first
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.audio.amplitude_interval = Duration::from_secs(60);
    config
}

/// Base64 PCM for `millis` of silence at 24 kHz
pub fn speech_chunk(millis: u32) -> InboundMessage {
    let samples = OUTPUT_RATE / 1000 * millis;
    InboundMessage::AudioDelivery {
        data: STANDARD.encode(vec![0u8; samples as usize * 2]),
    }
}
