//! Gemini Live connector for the voice pipeline.
//!
//! Implements `artea_voice::SessionConnector` against the
//! `BidiGenerateContent` WebSocket API: one setup handshake, then a proxy
//! task that translates between the pipeline's outbound frames/tool
//! results and the service's inbound server messages.

use artea_voice::{
    EncodedFrame, ServerEvent, SessionConfig, SessionConnector, SessionSink, ToolInvocation,
    ToolResult, VoiceError,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, error, info, warn};

const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";
const ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

// --- Wire types (kept private for encapsulation) ---
mod wire {
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) enum ClientMessage {
        Setup(Setup),
        RealtimeInput(RealtimeInput),
        ToolResponse(ToolResponse),
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct Setup {
        pub model: String,
        pub generation_config: GenerationConfig,
        pub system_instruction: Content,
        pub tools: Vec<Tool>,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct GenerationConfig {
        pub response_modalities: Vec<ResponseModality>,
        pub speech_config: SpeechConfig,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub(crate) enum ResponseModality {
        Audio,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct SpeechConfig {
        pub voice_config: VoiceSelection,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct VoiceSelection {
        pub prebuilt_voice_config: PrebuiltVoice,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct PrebuiltVoice {
        pub voice_name: String,
    }
    #[derive(Serialize)]
    pub(crate) struct Content {
        pub parts: Vec<Part>,
    }
    #[derive(Serialize)]
    pub(crate) struct Part {
        pub text: String,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct Tool {
        pub function_declarations: Vec<FunctionDeclaration>,
    }
    #[derive(Serialize)]
    pub(crate) struct FunctionDeclaration {
        pub name: String,
        pub description: String,
        pub parameters: Value,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct RealtimeInput {
        pub audio: Blob,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct Blob {
        pub mime_type: String,
        pub data: String,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct ToolResponse {
        pub function_responses: Vec<FunctionResponse>,
    }
    #[derive(Serialize)]
    pub(crate) struct FunctionResponse {
        pub id: String,
        pub name: String,
        pub response: Value,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct ServerMessage {
        pub setup_complete: Option<Value>,
        pub server_content: Option<ServerContent>,
        pub tool_call: Option<ToolCallMessage>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct ServerContent {
        pub model_turn: Option<ModelTurn>,
        pub interrupted: Option<bool>,
    }
    #[derive(Deserialize, Debug)]
    pub(crate) struct ModelTurn {
        pub parts: Vec<ServerPart>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct ServerPart {
        pub inline_data: Option<ServerBlob>,
    }
    #[derive(Deserialize, Debug)]
    pub(crate) struct ServerBlob {
        pub data: String,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct ToolCallMessage {
        pub function_calls: Vec<FunctionCall>,
    }
    #[derive(Deserialize, Debug)]
    pub(crate) struct FunctionCall {
        #[serde(default)]
        pub id: String,
        pub name: String,
        #[serde(default)]
        pub args: Value,
    }
}

/// Connector configuration, loaded from the environment like the rest of
/// the deployment.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Reads `GEMINI_API_KEY` (required) and `GEMINI_LIVE_MODEL`
    /// (optional override).
    pub fn from_env() -> Result<Self, VoiceError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| VoiceError::Config {
            name: "GEMINI_API_KEY".to_string(),
            reason: "environment variable not set".to_string(),
        })?;
        let model =
            std::env::var("GEMINI_LIVE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self { api_key, model })
    }
}

enum Outbound {
    Audio(EncodedFrame),
    ToolResult(ToolResult),
    Close,
}

struct GeminiSink {
    cmd_tx: mpsc::Sender<Outbound>,
}

#[async_trait]
impl SessionSink for GeminiSink {
    async fn send_audio_frame(&mut self, frame: EncodedFrame) -> Result<(), VoiceError> {
        self.cmd_tx
            .send(Outbound::Audio(frame))
            .await
            .map_err(|_| VoiceError::Transport("session task has exited".into()))
    }

    async fn send_tool_result(&mut self, result: ToolResult) -> Result<(), VoiceError> {
        self.cmd_tx
            .send(Outbound::ToolResult(result))
            .await
            .map_err(|_| VoiceError::Transport("session task has exited".into()))
    }

    async fn close(&mut self) -> Result<(), VoiceError> {
        // Best effort; the proxy task may already be gone.
        let _ = self.cmd_tx.send(Outbound::Close).await;
        Ok(())
    }
}

pub struct GeminiLiveConnector {
    config: GeminiConfig,
}

impl GeminiLiveConnector {
    pub fn new(config: GeminiConfig) -> Self {
        Self { config }
    }
}

fn setup_message(model: &str, session: &SessionConfig) -> wire::ClientMessage {
    wire::ClientMessage::Setup(wire::Setup {
        model: model.to_string(),
        generation_config: wire::GenerationConfig {
            response_modalities: vec![wire::ResponseModality::Audio],
            speech_config: wire::SpeechConfig {
                voice_config: wire::VoiceSelection {
                    prebuilt_voice_config: wire::PrebuiltVoice {
                        voice_name: session.voice.clone(),
                    },
                },
            },
        },
        system_instruction: wire::Content {
            parts: vec![wire::Part {
                text: session.system_instruction.clone(),
            }],
        },
        tools: vec![wire::Tool {
            function_declarations: session
                .tools
                .iter()
                .map(|tool| wire::FunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                })
                .collect(),
        }],
    })
}

/// The service frames JSON as either text or binary messages.
fn parse_server_message(msg: &WsMessage) -> Option<wire::ServerMessage> {
    let parsed = match msg {
        WsMessage::Text(text) => serde_json::from_str::<wire::ServerMessage>(text),
        WsMessage::Binary(bytes) => serde_json::from_slice::<wire::ServerMessage>(bytes),
        _ => return None,
    };
    match parsed {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(error = %e, "unparseable server message");
            None
        }
    }
}

fn translate(message: wire::ServerMessage) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    if let Some(tool_call) = message.tool_call {
        for call in tool_call.function_calls {
            events.push(ServerEvent::ToolCall(ToolInvocation {
                id: call.id,
                name: call.name,
                args: call.args,
            }));
        }
    }
    if let Some(content) = message.server_content {
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(blob) = part.inline_data {
                    events.push(ServerEvent::AudioChunk { data: blob.data });
                }
            }
        }
        if content.interrupted == Some(true) {
            events.push(ServerEvent::Interrupted);
        }
    }
    events
}

fn to_ws_text(message: &wire::ClientMessage) -> Result<WsMessage, VoiceError> {
    let serialized =
        serde_json::to_string(message).map_err(|e| VoiceError::Transport(e.to_string()))?;
    Ok(WsMessage::Text(serialized.into()))
}

#[async_trait]
impl SessionConnector for GeminiLiveConnector {
    async fn open(
        &self,
        session: &SessionConfig,
    ) -> Result<(Box<dyn SessionSink>, mpsc::Receiver<ServerEvent>), VoiceError> {
        let url = format!("{}?key={}", ENDPOINT, self.config.api_key);
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))?;
        info!(model = %self.config.model, "connected to Gemini Live");
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        ws_tx
            .send(to_ws_text(&setup_message(&self.config.model, session))?)
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))?;

        // The session is not usable until the service acknowledges setup.
        loop {
            let msg = ws_rx
                .next()
                .await
                .ok_or_else(|| VoiceError::Transport("connection closed during setup".into()))?
                .map_err(|e| VoiceError::Transport(e.to_string()))?;
            if let WsMessage::Close(frame) = &msg {
                return Err(VoiceError::Transport(format!(
                    "service closed during setup: {frame:?}"
                )));
            }
            match parse_server_message(&msg) {
                Some(message) if message.setup_complete.is_some() => {
                    info!("Gemini Live setup complete");
                    break;
                }
                Some(message) => {
                    warn!(?message, "unexpected message during setup");
                }
                None => {}
            }
        }

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<Outbound>(128);
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(128);

        tokio::spawn(async move {
            'proxy: loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(Outbound::Audio(frame)) => {
                            let msg = wire::ClientMessage::RealtimeInput(wire::RealtimeInput {
                                audio: wire::Blob {
                                    mime_type: frame.mime_type,
                                    data: frame.data,
                                },
                            });
                            if send_client_message(&mut ws_tx, &msg, &event_tx).await.is_err() {
                                break 'proxy;
                            }
                        }
                        Some(Outbound::ToolResult(result)) => {
                            let msg = wire::ClientMessage::ToolResponse(wire::ToolResponse {
                                function_responses: vec![wire::FunctionResponse {
                                    id: result.id,
                                    name: result.name,
                                    response: result.payload,
                                }],
                            });
                            if send_client_message(&mut ws_tx, &msg, &event_tx).await.is_err() {
                                break 'proxy;
                            }
                        }
                        Some(Outbound::Close) | None => {
                            let _ = ws_tx.send(WsMessage::Close(None)).await;
                            break 'proxy;
                        }
                    },
                    inbound = ws_rx.next() => match inbound {
                        Some(Ok(WsMessage::Close(frame))) => {
                            debug!(?frame, "service closed the session");
                            let _ = event_tx.send(ServerEvent::Closed).await;
                            break 'proxy;
                        }
                        Some(Ok(msg)) => {
                            if let Some(message) = parse_server_message(&msg) {
                                for event in translate(message) {
                                    if event_tx.send(event).await.is_err() {
                                        break 'proxy;
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Gemini Live socket error");
                            let _ = event_tx.send(ServerEvent::Error { message: e.to_string() }).await;
                            break 'proxy;
                        }
                        None => {
                            let _ = event_tx.send(ServerEvent::Closed).await;
                            break 'proxy;
                        }
                    },
                }
            }
            debug!("Gemini Live proxy task finished");
        });

        Ok((Box::new(GeminiSink { cmd_tx }), event_rx))
    }
}

async fn send_client_message<S>(
    ws_tx: &mut S,
    message: &wire::ClientMessage,
    event_tx: &mpsc::Sender<ServerEvent>,
) -> Result<(), ()>
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let msg = match to_ws_text(message) {
        Ok(msg) => msg,
        Err(e) => {
            error!(error = %e, "failed to serialize client message");
            return Ok(());
        }
    };
    if let Err(e) = ws_tx.send(msg).await {
        error!(error = %e, "failed to send to Gemini Live");
        let _ = event_tx
            .send(ServerEvent::Error {
                message: e.to_string(),
            })
            .await;
        return Err(());
    }
    Ok(())
}
