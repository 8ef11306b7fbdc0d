//! Token accounting.
//!
//! Estimates the token cost of a message list with a lexical approximation:
//! a fixed per-message overhead plus a characters-per-token ratio over
//! content and tool-call payloads. Deliberately infallible; malformed input
//! degrades to the character fallback instead of erroring.

use crate::conversation::Message;

/// Characters per token for the fallback approximation.
const CHARS_PER_TOKEN: usize = 4;

/// Fixed token overhead per message (role markers, separators).
const PER_MESSAGE_OVERHEAD: usize = 4;

/// Stateless token estimator.
#[derive(Debug, Clone, Copy)]
pub struct TokenAccountant {
    chars_per_token: usize,
}

impl Default for TokenAccountant {
    fn default() -> Self {
        Self {
            chars_per_token: CHARS_PER_TOKEN,
        }
    }
}

impl TokenAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Estimate tokens for a piece of text.
    pub fn estimate_text(&self, text: &str) -> usize {
        text.chars().count() / self.chars_per_token
    }

    /// Estimate tokens for one message, including tool-call payloads.
    pub fn estimate_message(&self, message: &Message) -> usize {
        let mut chars = message.content.chars().count();
        if let Some(tool_calls) = &message.tool_calls {
            for tc in tool_calls {
                chars += tc.name.chars().count();
                chars += tc.arguments.chars().count();
            }
        }
        PER_MESSAGE_OVERHEAD + chars / self.chars_per_token
    }

    /// Estimate tokens for a full message history.
    pub fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }
}
