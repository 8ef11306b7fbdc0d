//! Conversation and message types.
//!
//! A `Conversation` is an ordered message history plus the tool-call records
//! created while turns run against it. Messages are immutable once appended;
//! the only exception is compaction's atomic replacement of the whole
//! sequence with a single synthetic system message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A tool call requested by the model inside an assistant message.
///
/// `arguments` is the raw JSON string exactly as the model produced it;
/// parsing is deferred to dispatch so malformed arguments become a `failed`
/// tool result rather than a lost message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool calls requested by an assistant message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// For tool-role messages, the id of the call this responds to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tools(content: &str, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: &str, content: &str) -> Self {
        Self {
            role: Role::Tool,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.to_string()),
        }
    }

    /// Whether this assistant message requests any tool calls.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }
}

/// Lifecycle status of a tool call.
///
/// Transitions are monotonic: `pending → awaiting_approval → running →
/// {succeeded, failed, denied}`. A terminal status is written exactly once
/// and never overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    AwaitingApproval,
    Running,
    Succeeded,
    Failed,
    Denied,
}

impl ToolCallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Denied)
    }

    /// Position in the transition order; a transition is legal only if the
    /// rank strictly increases.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::AwaitingApproval => 1,
            Self::Running => 2,
            Self::Succeeded | Self::Failed | Self::Denied => 3,
        }
    }

    pub fn can_transition_to(&self, next: ToolCallStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Denied => "denied",
        };
        write!(f, "{s}")
    }
}

/// Persisted record of a tool call's lifecycle within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl ToolCallRecord {
    pub fn new(id: &str, name: &str, arguments: Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
            status: ToolCallStatus::Pending,
            output: None,
            created_at: Utc::now(),
        }
    }
}

/// A conversation: ordered messages plus tool-call records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Model override; engine falls back to the provider default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            title: None,
            model: None,
            messages: Vec::new(),
            tool_calls: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this conversation has seen any user message yet.
    pub fn has_user_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_constructors() {
        let m = Message::user("hi");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "hi");
        assert!(!m.has_tool_calls());

        let m = Message::tool_result("call-1", "done");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call-1"));

        let m = Message::assistant_with_tools("", vec![ToolCall::new("c1", "shell", "{}")]);
        assert!(m.has_tool_calls());
    }

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        let r: Role = serde_json::from_str("\"tool\"").unwrap();
        assert_eq!(r, Role::Tool);
    }

    #[test]
    fn test_status_transitions_monotonic() {
        use ToolCallStatus::*;
        assert!(Pending.can_transition_to(AwaitingApproval));
        assert!(Pending.can_transition_to(Running));
        assert!(AwaitingApproval.can_transition_to(Denied));
        assert!(Running.can_transition_to(Succeeded));

        // no going back
        assert!(!Running.can_transition_to(Pending));
        assert!(!AwaitingApproval.can_transition_to(Pending));

        // terminal is final
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Denied.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Succeeded));
    }

    #[test]
    fn test_tool_call_record_starts_pending() {
        let rec = ToolCallRecord::new("c1", "read_file", json!({"path": "a.txt"}));
        assert_eq!(rec.status, ToolCallStatus::Pending);
        assert!(rec.output.is_none());
    }

    #[test]
    fn test_conversation_has_user_message() {
        let mut conv = Conversation::new("conv-1");
        assert!(!conv.has_user_message());
        conv.messages.push(Message::system("sys"));
        assert!(!conv.has_user_message());
        conv.messages.push(Message::user("hello"));
        assert!(conv.has_user_message());
    }
}
