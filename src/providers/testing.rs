//! Scripted in-memory provider for tests and offline development.
//!
//! Each call pops the next scripted step: plain text, a set of tool calls,
//! or a failure. An empty script with a loop step configured repeats that
//! step forever, which is how iteration-cap behavior is exercised.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::conversation::Message;
use crate::error::{Result, SalonError};

use super::{ChatOptions, ModelProvider, ProviderResponse, ProviderToolCall, TokenSink, ToolDefinition};

enum Step {
    Text(String),
    ToolCalls {
        content: String,
        calls: Vec<ProviderToolCall>,
    },
    Fail(String),
}

/// A provider that replays a scripted sequence of responses.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    /// Step replayed once the script is exhausted
    looping: Option<Step>,
    calls: AtomicUsize,
    /// Pause between streamed chunks, imitating a slow model
    chunk_delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            looping: None,
            calls: AtomicUsize::new(0),
            chunk_delay: None,
        }
    }

    /// A provider that answers with the given texts, one per call.
    pub fn with_text(texts: &[&str]) -> Self {
        let provider = Self::new();
        for t in texts {
            provider.push_text(t);
        }
        provider
    }

    /// A provider whose every call fails.
    pub fn failing(reason: &str) -> Self {
        let mut provider = Self::new();
        provider.looping = Some(Step::Fail(reason.to_string()));
        provider
    }

    /// A provider that requests the same tool call on every iteration and
    /// never finishes.
    pub fn looping_tool_call(name: &str, arguments: &str) -> Self {
        let mut provider = Self::new();
        provider.looping = Some(Step::ToolCalls {
            content: String::new(),
            calls: vec![ProviderToolCall::new("call_loop", name, arguments)],
        });
        provider
    }

    /// Sleep this long after each streamed chunk, so cancellation mid-stream
    /// can be exercised.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn push_text(&self, content: &str) {
        self.steps
            .lock()
            .unwrap()
            .push_back(Step::Text(content.to_string()));
    }

    pub fn push_tool_call(&self, call_id: &str, name: &str, arguments: &str) {
        self.steps.lock().unwrap().push_back(Step::ToolCalls {
            content: String::new(),
            calls: vec![ProviderToolCall::new(call_id, name, arguments)],
        });
    }

    pub fn push_failure(&self, reason: &str) {
        self.steps
            .lock()
            .unwrap()
            .push_back(Step::Fail(reason.to_string()));
    }

    /// Number of chat calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self, step: &Step, sink: &TokenSink) -> Result<ProviderResponse> {
        match step {
            Step::Text(content) => {
                // stream in small chunks so ordering tests see real deltas
                let mut streamed = String::new();
                for piece in content.as_bytes().chunks(3) {
                    if sink.is_cancelled() {
                        return Ok(ProviderResponse::text(&streamed));
                    }
                    let piece = String::from_utf8_lossy(piece);
                    sink.send(&piece);
                    streamed.push_str(&piece);
                    if let Some(delay) = self.chunk_delay {
                        tokio::time::sleep(delay).await;
                    }
                }
                Ok(ProviderResponse::text(content))
            }
            Step::ToolCalls { content, calls } => {
                if !content.is_empty() {
                    sink.send(content);
                }
                Ok(ProviderResponse::with_tools(content, calls.clone()))
            }
            Step::Fail(reason) => Err(SalonError::Provider(reason.clone())),
        }
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn chat_stream(
        &self,
        _messages: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        _model: Option<&str>,
        _options: ChatOptions,
        sink: TokenSink,
    ) -> Result<ProviderResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(step) => self.respond(&step, &sink).await,
            None => match &self.looping {
                Some(step) => self.respond(step, &sink).await,
                None => Ok(ProviderResponse::text("")),
            },
        }
    }

    fn default_model(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_scripted_sequence_then_empty() {
        let provider = ScriptedProvider::with_text(&["one", "two"]);
        let r = provider
            .chat_stream(vec![], vec![], None, ChatOptions::new(), TokenSink::disabled())
            .await
            .unwrap();
        assert_eq!(r.content, "one");
        let r = provider
            .chat_stream(vec![], vec![], None, ChatOptions::new(), TokenSink::disabled())
            .await
            .unwrap();
        assert_eq!(r.content, "two");
        let r = provider
            .chat_stream(vec![], vec![], None, ChatOptions::new(), TokenSink::disabled())
            .await
            .unwrap();
        assert_eq!(r.content, "");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_streamed_chunks_concatenate_to_content() {
        let provider = ScriptedProvider::with_text(&["hello world"]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let r = provider
            .chat_stream(vec![], vec![], None, ChatOptions::new(), TokenSink::new(tx))
            .await
            .unwrap();

        let mut assembled = String::new();
        while let Ok(chunk) = rx.try_recv() {
            assembled.push_str(&chunk);
        }
        assert_eq!(assembled, r.content);
    }

    #[tokio::test]
    async fn test_looping_tool_call_never_ends() {
        let provider = ScriptedProvider::looping_tool_call("shell", "{\"command\": \"ls\"}");
        for _ in 0..5 {
            let r = provider
                .chat_stream(vec![], vec![], None, ChatOptions::new(), TokenSink::disabled())
                .await
                .unwrap();
            assert!(r.has_tool_calls());
        }
    }
}
