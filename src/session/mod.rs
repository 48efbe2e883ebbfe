//! Live session lifecycle
//!
//! ```text
//! DISCONNECTED ──connect──▶ CONNECTING ──open ack──▶ CONNECTED
//!       ▲                      │                        │
//!       │      acquisition/    │                        │ peer close
//!       │      transport error ▼                        ▼
//!       └──────disconnect──── ERROR ◀──stream error── (teardown)
//! ```

mod controller;
mod devices;
mod state;

pub use controller::{SessionController, SessionHandle};
pub use devices::{CpalDevices, DeviceProvider, Microphone, OutputContext};
pub use state::{ConnectionState, Effect, SessionCore, SessionEvent};
