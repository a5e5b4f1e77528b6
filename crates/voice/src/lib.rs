//! Real-time voice session pipeline for the Artea storefront assistant.
//!
//! This crate captures microphone audio, streams it to a remote
//! conversational service over an opaque bidirectional session, schedules
//! the synthesized speech that comes back for gapless playback, reacts to
//! barge-in interruptions, and bridges tool/function invocations from the
//! conversation back into the host application.
//!
//! The modules follow the data flow:
//!
//! - `audio`: PCM framing and the deterministic block-average resampler.
//! - `device`: capture/output device abstraction plus the cpal backend.
//! - `transport`: the opaque session consumed by the pipeline (sink +
//!   server-event stream). Concrete connectors live in sibling crates.
//! - `uplink`: microphone frames -> resample -> encode -> session.
//! - `playback`: inbound audio chunks -> gapless scheduling -> output.
//! - `tools`: tool-call registry and one-response-per-invocation bridge.
//! - `session`: the controller state machine that wires it all together
//!   and guarantees resource release on every exit path.

pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod playback;
pub mod session;
pub mod tools;
pub mod transport;
pub mod uplink;

pub use config::VoiceConfig;
pub use error::VoiceError;
pub use session::{HostCallbacks, SessionController, SessionStatus};
pub use transport::{
    EncodedFrame, ServerEvent, SessionConfig, SessionConnector, SessionSink, ToolDeclaration,
    ToolInvocation, ToolResult,
};
