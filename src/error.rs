//! Error types for the live voice session

use thiserror::Error;

use crate::session::ConnectionState;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a live voice session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone or output device could not be acquired
    #[error("device acquisition failed: {0}")]
    Acquisition(String),

    /// Audio processing error (resampling, stream setup after acquisition)
    #[error("audio error: {0}")]
    Audio(String),

    /// Inbound PCM could not be turned into a playable buffer
    #[error("decode error: {0}")]
    Decode(String),

    /// Transport envelope (base64) was not validly encoded
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Remote stream failed, closed during handshake, or timed out
    #[error("transport error: {0}")]
    Transport(String),

    /// Remote message could not be parsed
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation is not valid from the current connection state
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was rejected
        operation: &'static str,
        /// State the session was in
        state: ConnectionState,
    },

    /// The session controller is no longer running
    #[error("session controller has shut down")]
    ControllerClosed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether the error is contained by the component that detected it
    ///
    /// Recoverable errors drop the offending chunk or message and leave the
    /// session running.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::MalformedPayload(_) | Self::Protocol(_)
        )
    }

    /// Whether the error moves the session into a different connection state
    #[must_use]
    pub const fn changes_session_state(&self) -> bool {
        matches!(self, Self::Acquisition(_) | Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_failures_are_recoverable() {
        assert!(Error::Decode("odd".into()).is_recoverable());
        assert!(Error::MalformedPayload("bad".into()).is_recoverable());
        assert!(Error::Protocol("json".into()).is_recoverable());
        assert!(!Error::Transport("closed".into()).is_recoverable());
    }

    #[test]
    fn only_acquisition_and_transport_change_state() {
        assert!(Error::Acquisition("mic".into()).changes_session_state());
        assert!(Error::Transport("reset".into()).changes_session_state());
        assert!(!Error::Decode("odd".into()).changes_session_state());
        assert!(!Error::Config("key".into()).changes_session_state());
    }

    #[test]
    fn invalid_state_message_names_state() {
        let err = Error::InvalidState {
            operation: "connect",
            state: ConnectionState::Connected,
        };
        assert_eq!(err.to_string(), "cannot connect while CONNECTED");
    }
}
