//! Wire contract of the remote conversational-audio endpoint
//!
//! Outbound messages are externally tagged JSON objects (`{"setup": ...}`,
//! `{"realtimeInput": ...}`). Inbound messages are decoded once into the
//! closed [`InboundMessage`] set so nothing downstream probes optional
//! nested fields.

use serde::{Deserialize, Serialize};

use crate::voice::WireFrame;
use crate::{Error, Result};

/// Response modality requested from the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Audio,
    Text,
}

/// Parameters of the session open request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    /// Target model identifier
    pub model: String,
    pub modality: Modality,
    /// Prebuilt voice name
    pub voice: String,
    /// Persona/behavior prompt, opaque to the session
    pub system_instruction: String,
}

impl SessionSetup {
    /// Build the first message sent on a new stream
    #[must_use]
    pub fn to_message(&self) -> ClientMessage {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };

        ClientMessage::Setup(SetupPayload {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![self.modality],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![Part {
                    text: Some(self.system_instruction.clone()),
                    inline_data: None,
                }],
            },
        })
    }
}

/// Message sent to the remote endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupPayload),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Wrap one captured frame for transmission
    #[must_use]
    pub fn realtime(frame: WireFrame) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![frame],
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<WireFrame>,
}

/// Multi-part content, used both ways
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Inline binary payload, base64 encoded
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

/// Raw server message as it appears on the wire
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<Content>,
    #[serde(default)]
    interrupted: Option<bool>,
    #[serde(default)]
    turn_complete: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    #[serde(default)]
    time_left: Option<String>,
}

/// Message received from the remote endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Session open acknowledged
    Opened,
    /// Synthesized speech: base64 of 16-bit LE PCM at 24 kHz mono
    AudioDelivery { data: String },
    /// The user started speaking over the model
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// Stream closed by the peer
    Closed { reason: Option<String> },
    /// Stream failed
    Error(String),
}

impl InboundMessage {
    /// Whether the message ends the stream
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Error(_))
    }
}

/// Decode one server payload into inbound messages, in handling order
///
/// Audio parts come before an interruption carried by the same payload.
///
/// # Errors
///
/// Returns `Protocol` if the payload is not a JSON server message
pub fn parse_server_message(payload: &[u8]) -> Result<Vec<InboundMessage>> {
    let message: ServerMessage =
        serde_json::from_slice(payload).map_err(|e| Error::Protocol(e.to_string()))?;

    let mut out = Vec::new();

    if message.setup_complete.is_some() {
        out.push(InboundMessage::Opened);
    }

    if let Some(content) = message.server_content {
        let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
        for part in parts {
            let Some(blob) = part.inline_data else {
                continue;
            };
            let is_audio = blob
                .mime_type
                .as_deref()
                .is_none_or(|mime| mime.starts_with("audio/"));
            if is_audio && !blob.data.is_empty() {
                out.push(InboundMessage::AudioDelivery { data: blob.data });
            }
        }

        if content.interrupted == Some(true) {
            out.push(InboundMessage::Interrupted);
        }
        if content.turn_complete == Some(true) {
            out.push(InboundMessage::TurnComplete);
        }
    }

    if let Some(go_away) = message.go_away {
        tracing::debug!(time_left = ?go_away.time_left, "server announced disconnect");
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SessionSetup {
        SessionSetup {
            model: "gemini-live".to_string(),
            modality: Modality::Audio,
            voice: "Fenrir".to_string(),
            system_instruction: "Be precise.".to_string(),
        }
    }

    #[test]
    fn setup_message_shape() {
        let json = serde_json::to_value(setup().to_message()).unwrap();
        let setup = &json["setup"];
        assert_eq!(setup["model"], "models/gemini-live");
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Fenrir"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "Be precise.");
        assert!(setup["systemInstruction"]["parts"][0].get("inlineData").is_none());
    }

    #[test]
    fn model_prefix_not_doubled() {
        let mut s = setup();
        s.model = "models/gemini-live".to_string();
        let json = serde_json::to_value(s.to_message()).unwrap();
        assert_eq!(json["setup"]["model"], "models/gemini-live");
    }

    #[test]
    fn realtime_input_shape() {
        let frame = crate::voice::encode(&[0.0]);
        let json = serde_json::to_value(ClientMessage::realtime(frame)).unwrap();
        let chunk = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "AAA=");
    }

    #[test]
    fn parses_setup_complete() {
        let msgs = parse_server_message(br#"{"setupComplete":{}}"#).unwrap();
        assert_eq!(msgs, vec![InboundMessage::Opened]);
    }

    #[test]
    fn parses_audio_parts_in_order() {
        let payload = br#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}},
            {"text":"thinking"},
            {"inlineData":{"data":"AQA="}}
        ]}}}"#;
        let msgs = parse_server_message(payload).unwrap();
        assert_eq!(
            msgs,
            vec![
                InboundMessage::AudioDelivery { data: "AAA=".into() },
                InboundMessage::AudioDelivery { data: "AQA=".into() },
            ]
        );
    }

    #[test]
    fn interruption_follows_audio() {
        let payload = br#"{"serverContent":{"interrupted":true,"modelTurn":{"parts":[{"inlineData":{"data":"AAA="}}]}}}"#;
        let msgs = parse_server_message(payload).unwrap();
        assert_eq!(
            msgs,
            vec![
                InboundMessage::AudioDelivery { data: "AAA=".into() },
                InboundMessage::Interrupted,
            ]
        );
    }

    #[test]
    fn turn_complete_and_false_flags() {
        let msgs =
            parse_server_message(br#"{"serverContent":{"interrupted":false,"turnComplete":true}}"#)
                .unwrap();
        assert_eq!(msgs, vec![InboundMessage::TurnComplete]);
    }

    #[test]
    fn ignores_non_audio_inline_data() {
        let payload =
            br#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"image/png","data":"AAA="}}]}}}"#;
        assert!(parse_server_message(payload).unwrap().is_empty());
    }

    #[test]
    fn unknown_messages_decode_to_nothing() {
        assert!(parse_server_message(br#"{"usageMetadata":{"totalTokenCount":3}}"#)
            .unwrap()
            .is_empty());
        assert!(parse_server_message(br#"{"goAway":{"timeLeft":"10s"}}"#)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn invalid_json_is_protocol_error() {
        let err = parse_server_message(b"{not json").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn terminal_messages() {
        assert!(InboundMessage::Closed { reason: None }.is_terminal());
        assert!(InboundMessage::Error("x".into()).is_terminal());
        assert!(!InboundMessage::Interrupted.is_terminal());
    }
}
