//! Bidirectional stream to the remote conversational-audio model
//!
//! The session owns a [`Transport`] that opens one [`TransportLink`] per
//! connection. Inbound traffic is pushed onto the session event queue as
//! [`InboundMessage`] values.

mod protocol;
mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use protocol::{
    Blob, ClientMessage, Content, InboundMessage, Modality, Part, SessionSetup,
    parse_server_message,
};
pub use websocket::{DEFAULT_ENDPOINT, WebSocketLink, WebSocketTransport};

use crate::Result;
use crate::voice::WireFrame;

/// Opens streams to the remote endpoint
#[async_trait(?Send)]
pub trait Transport {
    /// Open a stream and send the setup request
    ///
    /// Returns once the stream is established; the open acknowledgement
    /// arrives later as [`InboundMessage::Opened`] on `inbound`.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the stream cannot be established
    async fn open(
        &mut self,
        setup: &SessionSetup,
        inbound: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<Box<dyn TransportLink>>;
}

/// One open stream
pub trait TransportLink {
    /// Queue one audio frame for transmission
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the stream is no longer writable
    fn send(&mut self, frame: WireFrame) -> Result<()>;

    /// Close the stream. Idempotent.
    fn close(&mut self);
}
