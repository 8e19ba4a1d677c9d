//! Live session wire protocol
//!
//! WebSocket client for the hosted conversational-AI service's
//! bidirectional streaming endpoint. The handshake sends a setup frame
//! (model, voice, system instruction) and waits for `setupComplete`;
//! afterwards microphone payloads go out as `realtimeInput` frames and
//! synthesized speech, transcripts, and interruption signals come back in
//! `serverContent` frames.
//!
//! The service delivers all of its messages as JSON, frequently inside
//! WebSocket Binary frames, so inbound handling sniffs Binary content for
//! a leading `{` before treating it as unexpected.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::SessionTransport;
use crate::audio::WirePayload;
use crate::{Error, Result};

/// Live WebSocket endpoint
const LIVE_WS_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// How long to wait for `setupComplete` before giving up
const SETUP_TIMEOUT_SECS: u64 = 15;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Parameters for one live session
#[derive(Debug, Clone)]
pub struct SessionSetup {
    /// Model identifier, without the `models/` prefix
    pub model: String,

    /// Prebuilt voice name for synthesized speech
    pub voice_name: String,

    /// System instruction assembled from the persona
    pub system_instruction: String,
}

// ── Setup message (first frame after connect) ──────────────────────

#[derive(Debug, Serialize)]
struct SetupMessage {
    setup: SetupPayload,
}

#[derive(Debug, Serialize)]
struct SetupPayload {
    model: String,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(rename = "systemInstruction")]
    system_instruction: SystemInstruction,
    /// Presence of this empty object asks the service to stream back a
    /// transcript of its own speech, which drives prosody analysis.
    #[serde(rename = "outputAudioTranscription")]
    output_audio_transcription: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    response_modalities: Vec<String>,
    #[serde(rename = "speechConfig")]
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
struct SpeechConfig {
    #[serde(rename = "voiceConfig")]
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
struct VoiceConfig {
    #[serde(rename = "prebuiltVoiceConfig")]
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
struct PrebuiltVoiceConfig {
    #[serde(rename = "voiceName")]
    voice_name: String,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

fn build_setup_message(setup: &SessionSetup) -> SetupMessage {
    SetupMessage {
        setup: SetupPayload {
            model: format!("models/{}", setup.model),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: setup.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction: SystemInstruction {
                parts: vec![TextPart {
                    text: setup.system_instruction.clone(),
                }],
            },
            output_audio_transcription: serde_json::json!({}),
        },
    }
}

// ── Outbound frames ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RealtimeInputMessage {
    #[serde(rename = "realtimeInput")]
    realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
struct RealtimeInput {
    #[serde(rename = "mediaChunks")]
    media_chunks: Vec<WirePayload>,
}

fn build_audio_message(payload: WirePayload) -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![payload],
        },
    }
}

fn build_text_message(text: &str) -> serde_json::Value {
    serde_json::json!({
        "clientContent": {
            "turns": [{
                "role": "user",
                "parts": [{ "text": text }]
            }],
            "turnComplete": true,
        }
    })
}

// ── Inbound events ─────────────────────────────────────────────────

/// One event received from the live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Handshake finished; audio may flow
    SetupComplete,

    /// A chunk of synthesized speech, still wire-encoded
    Audio {
        /// The encoded payload; decoding is the codec's job
        payload: WirePayload,
    },

    /// Transcript fragment of the remote voice's speech
    Transcript {
        /// Fragment text
        text: String,
    },

    /// The user barged in; all queued playback must stop
    Interrupted,

    /// The model finished its current response turn
    TurnComplete,

    /// Error reported by the service
    Error {
        /// Human-readable message
        message: String,
    },
}

/// Parse one JSON frame from the service into events
///
/// A single frame can carry several events at once (audio chunks plus a
/// transcript fragment is common). Event order inside a frame matters to
/// the controller: the transcript comes first so the accompanying audio is
/// scheduled under the profile it implies, and an interruption comes last
/// so it also cancels audio carried in the same frame.
#[must_use]
pub fn parse_server_message(json_text: &str) -> Vec<ServerEvent> {
    let value: serde_json::Value = match serde_json::from_str(json_text) {
        Ok(v) => v,
        Err(e) => {
            return vec![ServerEvent::Error {
                message: format!("unparseable server message: {e}"),
            }];
        }
    };

    let mut events = Vec::new();

    if value.get("setupComplete").is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(text) = value
        .pointer("/outputTranscription/text")
        .and_then(serde_json::Value::as_str)
    {
        if !text.is_empty() {
            events.push(ServerEvent::Transcript {
                text: text.to_string(),
            });
        }
    }

    if let Some(content) = value.get("serverContent") {
        if let Some(parts) = content
            .pointer("/modelTurn/parts")
            .and_then(serde_json::Value::as_array)
        {
            for part in parts {
                if let Some(inline) = part.get("inlineData") {
                    if let (Some(data), Some(mime_type)) = (
                        inline.get("data").and_then(serde_json::Value::as_str),
                        inline.get("mimeType").and_then(serde_json::Value::as_str),
                    ) {
                        events.push(ServerEvent::Audio {
                            payload: WirePayload {
                                data: data.to_string(),
                                mime_type: mime_type.to_string(),
                            },
                        });
                    }
                }
                if let Some(text) = part.get("text").and_then(serde_json::Value::as_str) {
                    events.push(ServerEvent::Transcript {
                        text: text.to_string(),
                    });
                }
            }
        }

        if content.get("turnComplete").and_then(serde_json::Value::as_bool) == Some(true) {
            events.push(ServerEvent::TurnComplete);
        }
        if content.get("interrupted").and_then(serde_json::Value::as_bool) == Some(true) {
            events.push(ServerEvent::Interrupted);
        }
    }

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown server error");
        events.push(ServerEvent::Error {
            message: message.to_string(),
        });
    }

    events
}

// ── Connection ─────────────────────────────────────────────────────

#[derive(Debug)]
enum Outbound {
    Audio(WirePayload),
    Text(String),
    Close,
}

/// A connected live session
///
/// Outbound messages are queued onto a writer task; inbound frames are
/// parsed by a reader task and surfaced through [`SessionTransport::next_event`].
/// Dropping the session ends both tasks.
pub struct LiveSession {
    outbound_tx: mpsc::Sender<Outbound>,
    event_rx: mpsc::Receiver<ServerEvent>,
}

impl LiveSession {
    /// Connect, perform the setup handshake, and start streaming
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if the WebSocket cannot be opened, the
    /// setup frame is rejected, or `setupComplete` does not arrive in time.
    pub async fn connect(api_key: &str, setup: &SessionSetup) -> Result<Self> {
        let url = format!("{LIVE_WS_URL}?key={api_key}");

        tracing::info!(model = %setup.model, voice = %setup.voice_name, "connecting live session");

        let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::Session(format!("failed to connect: {e}")))?;

        let setup_json = serde_json::to_string(&build_setup_message(setup))?;
        ws.send(WsMessage::Text(setup_json.into()))
            .await
            .map_err(|e| Error::Session(format!("failed to send setup: {e}")))?;

        await_setup_complete(&mut ws).await?;
        tracing::info!("live session setup complete");

        let (sink, source) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(256);
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(256);

        tokio::spawn(outbound_loop(outbound_rx, sink));
        tokio::spawn(inbound_loop(source, event_tx));

        Ok(Self {
            outbound_tx,
            event_rx,
        })
    }
}

#[async_trait::async_trait]
impl SessionTransport for LiveSession {
    async fn send_audio(&self, payload: WirePayload) -> Result<()> {
        self.outbound_tx
            .send(Outbound::Audio(payload))
            .await
            .map_err(|_| Error::Session("outbound channel closed".to_string()))
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.outbound_tx
            .send(Outbound::Text(text.to_string()))
            .await
            .map_err(|_| Error::Session("outbound channel closed".to_string()))
    }

    async fn next_event(&mut self) -> Option<ServerEvent> {
        self.event_rx.recv().await
    }

    async fn close(&mut self) {
        let _ = self.outbound_tx.send(Outbound::Close).await;
    }
}

/// Wait for the service to acknowledge the setup frame
async fn await_setup_complete(
    ws: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
) -> Result<()> {
    let wait = async {
        while let Some(result) = ws.next().await {
            match result {
                Ok(WsMessage::Binary(data)) if data.first() == Some(&b'{') => {
                    if let Ok(text) = std::str::from_utf8(&data) {
                        if text.contains("setupComplete") {
                            return Ok(());
                        }
                    }
                }
                Ok(WsMessage::Text(text)) if text.contains("setupComplete") => {
                    return Ok(());
                }
                Ok(WsMessage::Close(frame)) => {
                    return Err(Error::Session(format!(
                        "closed before setup completed: {frame:?}"
                    )));
                }
                Err(e) => {
                    return Err(Error::Session(format!(
                        "websocket error during setup: {e}"
                    )));
                }
                Ok(other) => {
                    tracing::debug!(frame = ?other, "ignoring frame during setup");
                }
            }
        }
        Err(Error::Session("stream ended before setup completed".to_string()))
    };

    tokio::time::timeout(std::time::Duration::from_secs(SETUP_TIMEOUT_SECS), wait)
        .await
        .map_err(|_| Error::Session("setup acknowledgement timed out".to_string()))?
}

/// Writer task: serialize queued messages onto the socket
async fn outbound_loop(mut rx: mpsc::Receiver<Outbound>, mut sink: WsSink) {
    while let Some(message) = rx.recv().await {
        let frame = match message {
            Outbound::Audio(payload) => {
                match serde_json::to_string(&build_audio_message(payload)) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize audio frame");
                        continue;
                    }
                }
            }
            Outbound::Text(text) => match serde_json::to_string(&build_text_message(&text)) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize text frame");
                    continue;
                }
            },
            Outbound::Close => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
        };

        if sink.send(WsMessage::Text(frame.into())).await.is_err() {
            tracing::warn!("websocket send failed, closing outbound loop");
            break;
        }
    }

    tracing::debug!("outbound loop terminated");
}

/// Reader task: parse inbound frames and forward events
///
/// Dropping `event_tx` on exit is what tells the controller the channel
/// has closed.
async fn inbound_loop(mut source: WsSource, event_tx: mpsc::Sender<ServerEvent>) {
    while let Some(result) = source.next().await {
        let events = match result {
            Ok(WsMessage::Text(text)) => parse_server_message(&text),
            Ok(WsMessage::Binary(data)) => {
                if data.first() == Some(&b'{') {
                    match std::str::from_utf8(&data) {
                        Ok(text) => parse_server_message(text),
                        Err(_) => continue,
                    }
                } else {
                    tracing::warn!(len = data.len(), "unexpected non-JSON binary frame");
                    continue;
                }
            }
            Ok(WsMessage::Close(frame)) => {
                tracing::info!(close_frame = ?frame, "live session closed by remote");
                break;
            }
            Ok(_) => continue, // ping/pong handled by tungstenite
            Err(e) => {
                tracing::error!(error = %e, "websocket error");
                let _ = event_tx
                    .send(ServerEvent::Error {
                        message: format!("websocket error: {e}"),
                    })
                    .await;
                break;
            }
        };

        for event in events {
            if event_tx.send(event).await.is_err() {
                tracing::debug!("event receiver dropped, closing inbound loop");
                return;
            }
        }
    }

    tracing::debug!("inbound loop terminated");
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_setup() -> SessionSetup {
        SessionSetup {
            model: "test-live-model".to_string(),
            voice_name: "Fenrir".to_string(),
            system_instruction: "You are Nexus.".to_string(),
        }
    }

    #[test]
    fn setup_message_has_wire_field_names() {
        let msg = build_setup_message(&test_setup());
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"setup\""));
        assert!(json.contains("models/test-live-model"));
        assert!(json.contains("responseModalities"));
        assert!(json.contains("prebuiltVoiceConfig"));
        assert!(json.contains("\"voiceName\":\"Fenrir\""));
        assert!(json.contains("systemInstruction"));
        assert!(json.contains("outputAudioTranscription"));
    }

    #[test]
    fn audio_message_wraps_payload_untouched() {
        let payload = WirePayload {
            data: "AAAA".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        };
        let json = serde_json::to_string(&build_audio_message(payload)).unwrap();

        assert!(json.contains("realtimeInput"));
        assert!(json.contains("mediaChunks"));
        assert!(json.contains("\"data\":\"AAAA\""));
        assert!(json.contains("\"mimeType\":\"audio/pcm;rate=16000\""));
    }

    #[test]
    fn text_message_completes_the_turn() {
        let json = serde_json::to_string(&build_text_message("hello")).unwrap();
        assert!(json.contains("clientContent"));
        assert!(json.contains("\"turnComplete\":true"));
        assert!(json.contains("hello"));
    }

    #[test]
    fn parse_setup_complete() {
        let events = parse_server_message(r#"{"setupComplete": {}}"#);
        assert_eq!(events, vec![ServerEvent::SetupComplete]);
    }

    #[test]
    fn parse_interrupted_and_turn_complete() {
        let events =
            parse_server_message(r#"{"serverContent": {"interrupted": true, "turnComplete": true}}"#);
        assert!(events.contains(&ServerEvent::Interrupted));
        assert!(events.contains(&ServerEvent::TurnComplete));
    }

    #[test]
    fn parse_audio_keeps_payload_encoded() {
        let json = r#"{"serverContent": {"modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "UXc="}}]}}}"#;
        let events = parse_server_message(json);

        assert_eq!(
            events,
            vec![ServerEvent::Audio {
                payload: WirePayload {
                    data: "UXc=".to_string(),
                    mime_type: "audio/pcm;rate=24000".to_string(),
                },
            }]
        );
    }

    #[test]
    fn parse_output_transcription() {
        let events = parse_server_message(r#"{"outputTranscription": {"text": "scene kya hai"}}"#);
        assert_eq!(
            events,
            vec![ServerEvent::Transcript {
                text: "scene kya hai".to_string(),
            }]
        );
    }

    #[test]
    fn parse_empty_transcription_is_ignored() {
        let events = parse_server_message(r#"{"outputTranscription": {"text": ""}}"#);
        assert!(events.is_empty());
    }

    #[test]
    fn parse_audio_and_transcript_in_one_frame() {
        let json = r#"{
            "serverContent": {"modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}}]}},
            "outputTranscription": {"text": "bhai sun"}
        }"#;
        let events = parse_server_message(json);
        assert_eq!(events.len(), 2);
        // Transcript first, so the audio in the same frame plays under it
        assert!(matches!(events[0], ServerEvent::Transcript { .. }));
        assert!(matches!(events[1], ServerEvent::Audio { .. }));
    }

    #[test]
    fn parse_error_message() {
        let events = parse_server_message(r#"{"error": {"message": "quota exceeded"}}"#);
        assert_eq!(
            events,
            vec![ServerEvent::Error {
                message: "quota exceeded".to_string(),
            }]
        );
    }

    #[test]
    fn parse_garbage_yields_error_event() {
        let events = parse_server_message("not json");
        assert!(matches!(events[0], ServerEvent::Error { .. }));
    }
}
