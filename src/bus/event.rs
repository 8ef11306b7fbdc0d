//! Typed events published on the bus.
//!
//! Every event travels inside an [`Envelope`] carrying the originating
//! client identifier, which subscribers use for echo suppression.

use crate::conversation::{Role, ToolCallStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events observers receive, scoped to a `(database, conversation)` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    StreamStart,
    StreamToken {
        content: String,
    },
    StreamDone,
    NewMessage {
        role: Role,
        content: String,
    },
    ToolCallStart {
        id: String,
        tool_name: String,
        input: Value,
    },
    ToolCallEnd {
        id: String,
        status: ToolCallStatus,
        output: Value,
    },
    ApprovalRequested {
        approval_id: String,
        message: String,
        deadline_secs: u64,
    },
    TitleChanged {
        title: String,
    },
    ConversationCreated {
        conversation_id: String,
    },
    ConversationDeleted {
        conversation_id: String,
    },
}

/// An event plus the client that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Originating client identifier
    pub origin: String,
    pub event: Event,
}
