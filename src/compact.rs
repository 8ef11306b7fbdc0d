//! Context compaction.
//!
//! When a conversation's estimated token cost crosses the auto-compact
//! threshold (or on explicit request), the full history is summarized by the
//! model and atomically replaced with a single synthetic system message.
//! Compaction is refused below a minimum history size; summarizing a two-
//! message conversation loses more than it saves.

use crate::conversation::{ConversationStore, Message};
use crate::error::{Result, SalonError};
use crate::providers::{ChatOptions, ModelProvider, TokenSink};
use crate::tokens::TokenAccountant;
use crate::utils::string::truncate_chars;
use serde::Serialize;
use tracing::info;

/// Character budget for each transcript entry fed to the summarizer.
const TRANSCRIPT_ENTRY_CHARS: usize = 500;

/// Completion budget for the summary itself.
const SUMMARY_MAX_TOKENS: u32 = 1000;

/// Fixed summarization instruction.
const SUMMARY_INSTRUCTIONS: &str = "Summarize the following conversation concisely, preserving:\n\
- Key decisions and conclusions\n\
- File paths that were read, written, or edited\n\
- Important code changes and their purpose\n\
- Current state of the task\n\
- Any errors encountered and how they were resolved\n\n";

/// Before/after accounting reported to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct CompactionReport {
    pub messages_before: usize,
    pub messages_after: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// Build the summarization prompt from a history, truncating each entry.
pub fn build_summary_prompt(messages: &[Message]) -> String {
    let mut lines = Vec::new();
    for msg in messages {
        if !msg.content.is_empty() {
            lines.push(format!(
                "{}: {}",
                msg.role,
                truncate_chars(&msg.content, TRANSCRIPT_ENTRY_CHARS)
            ));
        }
        if let Some(tool_calls) = &msg.tool_calls {
            for tc in tool_calls {
                lines.push(format!("  tool_call: {}", tc.name));
            }
        }
    }
    format!("{SUMMARY_INSTRUCTIONS}{}", lines.join("\n"))
}

/// Summarize a conversation's history and atomically replace it with a single
/// system message. Returns before/after counts so the caller can surface the
/// savings.
pub async fn compact_conversation(
    provider: &dyn ModelProvider,
    store: &dyn ConversationStore,
    accountant: &TokenAccountant,
    conversation_id: &str,
    model: Option<&str>,
    min_messages: usize,
) -> Result<CompactionReport> {
    let conversation = store
        .get(conversation_id)
        .await?
        .ok_or_else(|| SalonError::ConversationNotFound(conversation_id.to_string()))?;

    let messages_before = conversation.messages.len();
    if messages_before < min_messages {
        return Err(SalonError::Compaction(format!(
            "not enough messages to compact ({messages_before} < {min_messages})"
        )));
    }

    let tokens_before = accountant.estimate_messages(&conversation.messages);
    let prompt = build_summary_prompt(&conversation.messages);

    let response = provider
        .chat_stream(
            vec![Message::user(&prompt)],
            Vec::new(),
            model,
            ChatOptions::new().with_max_tokens(SUMMARY_MAX_TOKENS),
            TokenSink::disabled(),
        )
        .await?;
    let summary = if response.content.is_empty() {
        "Conversation summary unavailable.".to_string()
    } else {
        response.content
    };

    let note = format!(
        "Previous conversation summary (auto-compacted from {messages_before} messages, \
~{tokens_before} tokens):\n\n{summary}"
    );
    let replacement = vec![Message::system(&note)];
    let tokens_after = accountant.estimate_messages(&replacement);
    store.replace_messages(conversation_id, replacement).await?;

    info!(
        conversation_id,
        messages_before, tokens_before, tokens_after, "history compacted"
    );

    Ok(CompactionReport {
        messages_before,
        messages_after: 1,
        tokens_before,
        tokens_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{MemoryStore, Role, ToolCall};
    use crate::providers::testing::ScriptedProvider;

    async fn filled_store() -> (MemoryStore, String) {
        let store = MemoryStore::new();
        let conv = store.create().await.unwrap();
        (store, conv.id)
    }

    #[test]
    fn test_summary_prompt_truncates_entries() {
        let messages = vec![
            Message::user(&"u".repeat(2000)),
            Message::assistant_with_tools("running", vec![ToolCall::new("c1", "shell", "{}")]),
        ];
        let prompt = build_summary_prompt(&messages);
        assert!(prompt.starts_with("Summarize the following conversation"));
        assert!(prompt.contains(&format!("user: {}...", "u".repeat(500))));
        assert!(prompt.contains("  tool_call: shell"));
        assert!(!prompt.contains(&"u".repeat(501)));
    }

    #[tokio::test]
    async fn test_refuses_small_history() {
        let (store, id) = filled_store().await;
        for content in ["a", "b", "c"] {
            store.append_message(&id, Message::user(content)).await.unwrap();
        }
        let provider = ScriptedProvider::with_text(&["unused summary"]);
        let accountant = TokenAccountant::new();
        let err = compact_conversation(&provider, &store, &accountant, &id, None, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, SalonError::Compaction(_)));
        // history untouched
        let conv = store.get(&id).await.unwrap().unwrap();
        assert_eq!(conv.messages.len(), 3);
    }

    #[tokio::test]
    async fn test_replaces_history_with_single_system_message() {
        let (store, id) = filled_store().await;
        for i in 0..6 {
            store
                .append_message(&id, Message::user(&format!("message {i}")))
                .await
                .unwrap();
        }
        let provider = ScriptedProvider::with_text(&["the gist of it"]);
        let accountant = TokenAccountant::new();
        let report = compact_conversation(&provider, &store, &accountant, &id, None, 4)
            .await
            .unwrap();

        assert_eq!(report.messages_before, 6);
        assert_eq!(report.messages_after, 1);
        assert!(report.tokens_after < report.tokens_before + 50);

        let conv = store.get(&id).await.unwrap().unwrap();
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.messages[0].role, Role::System);
        assert!(conv.messages[0]
            .content
            .starts_with("Previous conversation summary (auto-compacted from 6 messages"));
        assert!(conv.messages[0].content.ends_with("the gist of it"));
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_history_intact() {
        let (store, id) = filled_store().await;
        for i in 0..5 {
            store
                .append_message(&id, Message::user(&format!("m{i}")))
                .await
                .unwrap();
        }
        let provider = ScriptedProvider::failing("summary backend down");
        let accountant = TokenAccountant::new();
        let err = compact_conversation(&provider, &store, &accountant, &id, None, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, SalonError::Provider(_)));
        let conv = store.get(&id).await.unwrap().unwrap();
        assert_eq!(conv.messages.len(), 5);
    }
}
