//! Provider-facing types: the `ModelProvider` trait, chat options, and
//! response structures.

use crate::conversation::{CancelFlag, Message};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// A tool definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// Options for a chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
}

impl ChatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A tool call requested by the model.
///
/// `arguments` is the raw JSON string; it stays unparsed until dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ProviderToolCall {
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A completed model response.
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub content: String,
    pub tool_calls: Vec<ProviderToolCall>,
    pub usage: Option<Usage>,
}

impl ProviderResponse {
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            ..Default::default()
        }
    }

    pub fn with_tools(content: &str, tool_calls: Vec<ProviderToolCall>) -> Self {
        Self {
            content: content.to_string(),
            tool_calls,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Destination for streamed content deltas.
///
/// Sending is best-effort and never blocks: a disabled sink (or one whose
/// receiver is gone) silently discards chunks, so providers don't care
/// whether anyone is watching the stream.
///
/// The sink also carries the turn's cancel flag. Providers must poll
/// [`TokenSink::is_cancelled`] between chunks and stop generating when it
/// fires, returning whatever content accumulated so far.
#[derive(Clone)]
pub struct TokenSink {
    tx: Option<mpsc::UnboundedSender<String>>,
    cancel: Option<CancelFlag>,
}

impl TokenSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            tx: Some(tx),
            cancel: None,
        }
    }

    /// A sink that discards everything (non-interactive calls: titles,
    /// summaries).
    pub fn disabled() -> Self {
        Self {
            tx: None,
            cancel: None,
        }
    }

    /// Attach the turn's cancel flag so the provider can stop mid-stream.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn send(&self, chunk: &str) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(chunk.to_string());
        }
    }

    /// True once the turn has been cancelled; providers break their chunk
    /// loop on this and return the partial accumulation.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_set)
    }
}

/// A chat-completion model backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Run one chat completion, streaming content deltas into `sink` as they
    /// arrive and returning the assembled response (content + tool calls).
    ///
    /// `model: None` uses the provider's default model.
    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
        sink: TokenSink,
    ) -> Result<ProviderResponse>;

    /// The model used when a conversation has no explicit override.
    fn default_model(&self) -> &str;

    /// Provider name for logging.
    fn name(&self) -> &str;
}
