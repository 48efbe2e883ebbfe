//! Audio device seams
//!
//! The controller acquires hardware through [`DeviceProvider`] so sessions
//! can run against fakes in tests. [`CpalDevices`] is the real backend.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;
use crate::voice::{
    AudioBuffer, AudioCapture, AudioPlayback, CaptureConfig, CaptureFrame, OutputClock,
    OutputConfig, PlaybackId, ScheduledPlayback, SignalTap,
};

/// Exclusive handle on the microphone
///
/// Implementations release the device on drop.
pub trait Microphone {
    /// Stop capturing and release the device. Idempotent.
    fn release(&mut self);

    fn is_capturing(&self) -> bool;
}

/// Output device context owning the output clock
///
/// Implementations close the device on drop.
pub trait OutputContext {
    /// Clock of rendered output, zero when the context opened
    fn clock(&self) -> Arc<dyn OutputClock>;

    /// Tap on the rendered signal for the amplitude monitor
    fn tap(&self) -> SignalTap;

    /// Start `buffer` at `entry.start`
    ///
    /// # Errors
    ///
    /// Returns error if the buffer cannot be played on this device
    fn start(&mut self, entry: &ScheduledPlayback, buffer: &AudioBuffer) -> Result<()>;

    /// Stop an entry immediately
    fn stop(&mut self, id: PlaybackId);

    /// Stop output and drop queued entries. Idempotent.
    fn close(&mut self);
}

/// Acquires audio devices for a session
#[async_trait(?Send)]
pub trait DeviceProvider {
    /// Open the output context
    ///
    /// Finished entries are reported on `ended`.
    ///
    /// # Errors
    ///
    /// Returns `Acquisition` if the output device cannot be opened
    async fn open_output(
        &mut self,
        config: &OutputConfig,
        ended: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Box<dyn OutputContext>>;

    /// Acquire the microphone and start delivering frames on `frames`
    ///
    /// # Errors
    ///
    /// Returns `Acquisition` if the microphone cannot be opened
    async fn acquire_microphone(
        &mut self,
        config: &CaptureConfig,
        frames: mpsc::UnboundedSender<CaptureFrame>,
    ) -> Result<Box<dyn Microphone>>;
}

/// Default host devices via cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDevices;

#[async_trait(?Send)]
impl DeviceProvider for CpalDevices {
    async fn open_output(
        &mut self,
        config: &OutputConfig,
        ended: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Box<dyn OutputContext>> {
        Ok(Box::new(AudioPlayback::open(config, ended)?))
    }

    async fn acquire_microphone(
        &mut self,
        config: &CaptureConfig,
        frames: mpsc::UnboundedSender<CaptureFrame>,
    ) -> Result<Box<dyn Microphone>> {
        Ok(Box::new(AudioCapture::open(config, frames)?))
    }
}

impl Microphone for AudioCapture {
    fn release(&mut self) {
        Self::release(self);
    }

    fn is_capturing(&self) -> bool {
        Self::is_capturing(self)
    }
}

impl OutputContext for AudioPlayback {
    fn clock(&self) -> Arc<dyn OutputClock> {
        Arc::new(Self::clock(self))
    }

    fn tap(&self) -> SignalTap {
        Self::tap(self)
    }

    fn start(&mut self, entry: &ScheduledPlayback, buffer: &AudioBuffer) -> Result<()> {
        Self::start(self, entry, buffer)
    }

    fn stop(&mut self, id: PlaybackId) {
        Self::stop(self, id);
    }

    fn close(&mut self) {
        Self::close(self);
    }
}
