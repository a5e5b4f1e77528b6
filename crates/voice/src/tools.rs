//! Bridges tool/function invocations from the conversation into host
//! side effects.
//!
//! The remote service expects exactly one response per invocation to keep
//! its turn-taking state consistent, so nothing in here is allowed to
//! escape as an error: unknown tools and handler failures become
//! error-shaped payloads, and duplicate deliveries of an already-answered
//! id are discarded.

use crate::transport::{ToolInvocation, ToolResult};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};

/// A synchronous host-supplied handler. The returned value becomes the
/// tool result payload verbatim.
pub type ToolHandler = Box<dyn Fn(&Value) -> anyhow::Result<Value> + Send + Sync>;

#[derive(Default)]
pub struct ToolCallBridge {
    handlers: HashMap<String, ToolHandler>,
    answered: HashSet<String>,
}

impl ToolCallBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    /// Resolves one invocation to at most one result.
    ///
    /// Returns `None` only for a duplicate id, which must not be answered
    /// twice; every fresh id gets a result, error-shaped if need be.
    pub fn handle(&mut self, invocation: &ToolInvocation) -> Option<ToolResult> {
        if !self.answered.insert(invocation.id.clone()) {
            tracing::warn!(id = %invocation.id, tool = %invocation.name, "duplicate tool invocation discarded");
            return None;
        }
        let payload = match self.handlers.get(&invocation.name) {
            None => {
                tracing::warn!(tool = %invocation.name, "unknown tool requested");
                json!({ "error": format!("unknown tool: {}", invocation.name) })
            }
            Some(handler) => match handler(&invocation.args) {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!(tool = %invocation.name, error = %e, "tool handler failed");
                    json!({ "error": e.to_string() })
                }
            },
        };
        Some(ToolResult {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            payload,
        })
    }
}
