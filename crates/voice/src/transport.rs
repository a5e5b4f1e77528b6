//! The opaque bidirectional session consumed by the pipeline.
//!
//! The controller never talks to a concrete conversational service; it
//! opens a session through a [`SessionConnector`] and gets back a write
//! half ([`SessionSink`]) and a stream of [`ServerEvent`]s. Concrete
//! connectors (e.g. the Gemini Live client) live in sibling crates and
//! implement these traits.

use crate::error::VoiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// A base64 PCM16 buffer at the service input rate, tagged with its MIME type.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub mime_type: String,
    pub data: String,
}

/// A structured function-invocation request embedded in the conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// The single response owed for a [`ToolInvocation`].
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub payload: Value,
}

/// Declares a tool to the remote service when the session opens.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's arguments.
    pub parameters: Value,
}

/// Session parameters passed to [`SessionConnector::open`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Prebuilt voice the service should synthesize with.
    pub voice: String,
    /// System behavior script for the conversation.
    pub system_instruction: String,
    pub tools: Vec<ToolDeclaration>,
}

/// Everything the remote service can deliver on the inbound stream.
///
/// Audio chunks and tool calls interleave in arbitrary order; the
/// controller dispatches the union with a single `match`.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Base64 PCM16 synthesized speech at the service output rate.
    AudioChunk { data: String },
    ToolCall(ToolInvocation),
    /// Barge-in: the user started speaking over playback.
    Interrupted,
    /// The remote side ended the session normally.
    Closed,
    /// Transport-level failure; terminal for the session.
    Error { message: String },
}

/// Write half of an open session.
#[async_trait]
pub trait SessionSink: Send {
    async fn send_audio_frame(&mut self, frame: EncodedFrame) -> Result<(), VoiceError>;
    async fn send_tool_result(&mut self, result: ToolResult) -> Result<(), VoiceError>;
    async fn close(&mut self) -> Result<(), VoiceError>;
}

/// Opens sessions against a remote conversational service.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(
        &self,
        config: &SessionConfig,
    ) -> Result<(Box<dyn SessionSink>, mpsc::Receiver<ServerEvent>), VoiceError>;
}
