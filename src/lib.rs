//! Elio Live - realtime full-duplex voice sessions
//!
//! This library provides the audio session core behind the `elio` tutor:
//! - Microphone capture, framing and the mute gate
//! - PCM encoding for the remote conversational-audio endpoint
//! - Gapless, interruptible playback scheduling of streamed speech
//! - Output amplitude monitoring for visualization
//! - The session state machine tying them to the remote stream
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 SessionController                     │
//! │   commands │ state watch │ mute gate │ amplitude     │
//! └───────┬───────────────┬───────────────────┬──────────┘
//!         │ capture        │ inbound           │ tap
//! ┌───────▼──────┐  ┌──────▼───────┐  ┌────────▼─────────┐
//! │  Microphone  │  │  Live stream │  │  Output context  │
//! │ frame+encode │  │  (WebSocket) │  │ scheduler+render │
//! └──────────────┘  └──────────────┘  └──────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod live;
pub mod persona;
pub mod session;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use persona::Persona;
pub use session::{ConnectionState, SessionController, SessionHandle};
