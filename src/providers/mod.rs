//! Model provider abstractions and implementations.
//!
//! The engine talks to models through [`ModelProvider`]: one streaming chat
//! call that yields content deltas into a [`TokenSink`] and returns the
//! assembled response. [`OpenAiProvider`] covers any OpenAI-compatible API;
//! [`testing::ScriptedProvider`] drives tests without a network.

pub mod openai;
pub mod testing;
mod types;

pub use openai::OpenAiProvider;
pub use types::{
    ChatOptions, ModelProvider, ProviderResponse, ProviderToolCall, TokenSink, ToolDefinition,
    Usage,
};
