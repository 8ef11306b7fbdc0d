//! OpenAI-compatible chat completions provider.
//!
//! Implements [`ModelProvider`] against the `/chat/completions` endpoint with
//! SSE streaming. Tool-call deltas arrive fragmented and index-keyed; they
//! are accumulated per index and emitted in index order once the stream
//! finishes. Works with any OpenAI-compatible API via a custom base URL.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::conversation::{Message, Role};
use crate::error::{Result, SalonError};

use super::{
    ChatOptions, ModelProvider, ProviderResponse, ProviderToolCall, TokenSink, ToolDefinition,
    Usage,
};

/// The default API endpoint URL.
const DEFAULT_API_URL: &str = "https://api.openai.com/v1";

/// The default model to use.
const DEFAULT_MODEL: &str = "gpt-4o";

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamRequestOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct StreamRequestOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: String,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// ============================================================================
// Streaming Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<DeltaToolCall>>,
}

/// A fragment of a tool call; fields trickle in across chunks, keyed by index.
#[derive(Debug, Deserialize)]
struct DeltaToolCall {
    index: usize,
    id: Option<String>,
    function: Option<DeltaFunction>,
}

#[derive(Debug, Deserialize)]
struct DeltaFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireErrorResponse {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}

// ============================================================================
// Provider
// ============================================================================

/// OpenAI-compatible provider.
pub struct OpenAiProvider {
    api_key: String,
    api_base: String,
    default_model: String,
    client: Client,
}

impl OpenAiProvider {
    /// Create a provider against the default OpenAI endpoint.
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, DEFAULT_API_URL, DEFAULT_MODEL)
    }

    /// Create a provider against a custom OpenAI-compatible endpoint.
    pub fn with_base_url(api_key: &str, api_base: &str, default_model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            default_model: default_model.to_string(),
            client: Client::new(),
        }
    }
}

// ============================================================================
// Conversion
// ============================================================================

fn convert_messages(messages: Vec<Message>) -> Vec<WireMessage> {
    messages
        .into_iter()
        .map(|msg| {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            }
            .to_string();

            let tool_calls = msg.tool_calls.map(|tcs| {
                tcs.into_iter()
                    .map(|tc| WireToolCall {
                        id: tc.id,
                        r#type: "function".to_string(),
                        function: WireFunctionCall {
                            name: tc.name,
                            arguments: tc.arguments,
                        },
                    })
                    .collect()
            });

            WireMessage {
                role,
                content: if msg.content.is_empty() && tool_calls.is_some() {
                    None
                } else {
                    Some(msg.content)
                },
                tool_calls,
                tool_call_id: msg.tool_call_id,
            }
        })
        .collect()
}

fn convert_tools(tools: Vec<ToolDefinition>) -> Vec<WireTool> {
    tools
        .into_iter()
        .map(|t| WireTool {
            r#type: "function".to_string(),
            function: WireFunctionDef {
                name: t.name,
                description: t.description,
                parameters: t.parameters,
            },
        })
        .collect()
}

/// Partially assembled tool call, filled in as deltas arrive.
#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
        sink: TokenSink,
    ) -> Result<ProviderResponse> {
        let model = model.unwrap_or(&self.default_model);
        let request = ChatRequest {
            model: model.to_string(),
            messages: convert_messages(messages),
            stream: true,
            stream_options: Some(StreamRequestOptions {
                include_usage: true,
            }),
            tools: if tools.is_empty() {
                None
            } else {
                Some(convert_tools(tools))
            },
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            stop: options.stop,
        };

        debug!(model, "sending chat completion request");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<WireErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(SalonError::Provider(format!("{status}: {message}")));
        }

        let mut content = String::new();
        let mut pending: BTreeMap<usize, PendingToolCall> = BTreeMap::new();
        let mut usage: Option<Usage> = None;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        'outer: while let Some(chunk) = stream.next().await {
            // Dropping the body stream closes the connection, so a cancelled
            // turn stops the completion instead of letting it run to the end.
            if sink.is_cancelled() {
                break 'outer;
            }
            let bytes =
                chunk.map_err(|e| SalonError::Provider(format!("stream interrupted: {e}")))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                let line = line.trim();
                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload == "[DONE]" {
                    break 'outer;
                }

                let parsed: StreamChunk = match serde_json::from_str(payload) {
                    Ok(p) => p,
                    Err(e) => {
                        trace!(error = %e, "skipping unparseable stream line");
                        continue;
                    }
                };

                if let Some(u) = parsed.usage {
                    usage = Some(Usage::new(u.prompt_tokens, u.completion_tokens));
                }
                for choice in parsed.choices {
                    if let Some(delta) = choice.delta.content {
                        if !delta.is_empty() {
                            sink.send(&delta);
                            content.push_str(&delta);
                        }
                    }
                    for tc in choice.delta.tool_calls.unwrap_or_default() {
                        let entry = pending.entry(tc.index).or_default();
                        if let Some(id) = tc.id {
                            entry.id = id;
                        }
                        if let Some(function) = tc.function {
                            if let Some(name) = function.name {
                                entry.name.push_str(&name);
                            }
                            if let Some(arguments) = function.arguments {
                                entry.arguments.push_str(&arguments);
                            }
                        }
                    }
                }
            }
        }

        let tool_calls: Vec<ProviderToolCall> = pending
            .into_values()
            .map(|p| ProviderToolCall::new(&p.id, &p.name, &p.arguments))
            .collect();

        let mut result = if tool_calls.is_empty() {
            ProviderResponse::text(&content)
        } else {
            ProviderResponse::with_tools(&content, tool_calls)
        };
        if let Some(u) = usage {
            result = result.with_usage(u);
        }
        Ok(result)
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn name(&self) -> &str {
        "openai"
    }
}
