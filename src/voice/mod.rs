//! Voice processing module
//!
//! Handles audio capture, PCM encoding, gapless playback scheduling and the
//! output amplitude monitor. The remote stream lives in [`crate::live`].

mod capture;
mod clock;
mod codec;
mod decode;
mod monitor;
mod playback;
mod resample;
mod scheduler;

pub use capture::{AudioCapture, CaptureConfig, CaptureFrame, FRAME_SIZE, Framer, MuteGate};
pub use clock::{FrameClock, ManualClock, OutputClock};
pub use codec::{
    INPUT_SAMPLE_RATE, WireFrame, decode_envelope, encode, encode_with_rate, i16_to_sample,
    pcm_mime_type, sample_to_i16, samples_to_pcm16,
};
pub use decode::{
    AudioBuffer, InboundChunk, OUTPUT_SAMPLE_RATE, decode_to_buffer, duration_to_frames,
    frames_to_duration,
};
pub use monitor::{AmplitudeLevel, AmplitudeMonitor, DEFAULT_FFT_SIZE, MAX_FFT_SIZE, SignalTap};
pub use playback::{AudioPlayback, OutputConfig, Timeline};
pub use resample::{StreamResampler, resample};
pub use scheduler::{PlaybackId, PlaybackScheduler, ScheduledPlayback};
