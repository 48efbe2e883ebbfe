//! WebSocket transport for the Gemini Live API

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::protocol::{ClientMessage, InboundMessage, SessionSetup, parse_server_message};
use super::{Transport, TransportLink};
use crate::config::Config;
use crate::voice::WireFrame;
use crate::{Error, Result};

/// Public bidirectional generate-content endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens authenticated WebSocket streams
pub struct WebSocketTransport {
    endpoint: Url,
    api_key: SecretString,
}

impl WebSocketTransport {
    /// Create a transport for `endpoint`
    ///
    /// # Errors
    ///
    /// Returns `Config` if the endpoint is not a ws/wss URL
    pub fn new(endpoint: &str, api_key: SecretString) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| Error::Config(format!("invalid endpoint: {e}")))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "endpoint scheme must be ws or wss, got {}",
                endpoint.scheme()
            )));
        }
        Ok(Self { endpoint, api_key })
    }

    /// Create a transport from loaded configuration
    ///
    /// # Errors
    ///
    /// Returns `Config` if no API key is configured or the endpoint is invalid
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            Error::Config("no API key configured (set GEMINI_API_KEY)".to_string())
        })?;
        Self::new(&config.endpoint, api_key)
    }

    /// Endpoint without credentials, safe to log
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        url
    }
}

#[async_trait(?Send)]
impl Transport for WebSocketTransport {
    async fn open(
        &mut self,
        setup: &SessionSetup,
        inbound: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<Box<dyn TransportLink>> {
        tracing::debug!(endpoint = %self.endpoint, "opening live stream");

        let (socket, _response) = connect_async(self.request_url().as_str())
            .await
            .map_err(|e| Error::Transport(format!("connect failed: {e}")))?;

        let (mut sender, receiver) = socket.split();

        let setup_json = serde_json::to_string(&setup.to_message())?;
        sender
            .send(Message::Text(setup_json.into()))
            .await
            .map_err(|e| Error::Transport(format!("failed to send setup: {e}")))?;

        tracing::debug!(model = %setup.model, voice = %setup.voice, "session setup sent");

        let (outgoing, rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(write_loop(sender, rx));
        let reader = tokio::spawn(read_loop(receiver, inbound));

        Ok(Box::new(WebSocketLink {
            outgoing,
            writer,
            reader,
            closed: false,
        }))
    }
}

/// Open WebSocket stream
///
/// Writes are queued to a writer task; a reader task forwards decoded
/// server messages to the session.
pub struct WebSocketLink {
    outgoing: mpsc::UnboundedSender<Message>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    closed: bool,
}

impl TransportLink for WebSocketLink {
    fn send(&mut self, frame: WireFrame) -> Result<()> {
        if self.closed {
            return Err(Error::Transport("stream closed".to_string()));
        }
        let text = serde_json::to_string(&ClientMessage::realtime(frame))?;
        self.outgoing
            .send(Message::Text(text.into()))
            .map_err(|_| Error::Transport("stream writer stopped".to_string()))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.reader.abort();
        // Writer exits after flushing the close frame
        if self.outgoing.send(Message::Close(None)).is_err() {
            self.writer.abort();
        }
        tracing::debug!("live stream closed");
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop(
    mut sender: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = sender.send(msg).await {
            tracing::warn!(error = %e, "live stream write failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sender.close().await;
}

async fn read_loop(
    mut receiver: SplitStream<WsStream>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
) {
    while let Some(next) = receiver.next().await {
        let delivered = match next {
            Ok(Message::Text(text)) => dispatch(text.as_bytes(), &inbound),
            Ok(Message::Binary(bytes)) => dispatch(&bytes, &inbound),
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty());
                tracing::info!(reason = ?reason, "live stream closed by peer");
                let _ = inbound.send(InboundMessage::Closed { reason });
                return;
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!(len = data.len(), "received ping");
                true
            }
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "live stream read failed");
                let _ = inbound.send(InboundMessage::Error(e.to_string()));
                return;
            }
        };
        if !delivered {
            return;
        }
    }
    let _ = inbound.send(InboundMessage::Closed { reason: None });
}

/// Forward one payload; false once the session stopped listening
fn dispatch(payload: &[u8], inbound: &mpsc::UnboundedSender<InboundMessage>) -> bool {
    match parse_server_message(payload) {
        Ok(messages) => messages.into_iter().all(|m| inbound.send(m).is_ok()),
        Err(e) => {
            tracing::warn!(error = %e, "dropping unparsable server message");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_url_carries_key() {
        let transport =
            WebSocketTransport::new("wss://example.com/live", SecretString::from("k3y".to_string())).unwrap();
        let url = transport.request_url();
        assert_eq!(url.query(), Some("key=k3y"));
        assert!(transport.endpoint().query().is_none());
    }

    #[test]
    fn rejects_http_endpoint() {
        let err = WebSocketTransport::new("https://example.com", SecretString::from("k".to_string()))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_key_is_config_error() {
        let config = Config::default();
        assert!(config.api_key.is_none());
        assert!(matches!(
            WebSocketTransport::from_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn dispatch_skips_bad_payloads() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(dispatch(b"garbage", &tx));
        assert!(rx.try_recv().is_err());

        assert!(dispatch(br#"{"setupComplete":{}}"#, &tx));
        assert_eq!(rx.try_recv().unwrap(), InboundMessage::Opened);

        drop(rx);
        assert!(!dispatch(br#"{"setupComplete":{}}"#, &tx));
    }
}
