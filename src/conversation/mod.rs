//! Conversation storage and turn control.
//!
//! The persistence collaborator is abstracted behind [`ConversationStore`]:
//! a durable, strongly-consistent store whose only transaction semantics are
//! "append" and "atomic replace" (used by compaction). [`MemoryStore`] is the
//! in-process reference implementation.
//!
//! [`ConversationControl`] owns the per-conversation execution locks and
//! cancellation flags. At most one turn holds a conversation's lock at a
//! time; a second caller observes `ConversationBusy` synchronously instead
//! of queueing.

mod types;

pub use types::{Conversation, Message, Role, ToolCall, ToolCallRecord, ToolCallStatus};

use crate::error::{Result, SalonError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::warn;

/// Persistence collaborator for conversations, messages, and tool calls.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a new empty conversation and return it.
    async fn create(&self) -> Result<Conversation>;

    /// Fetch a conversation by id.
    async fn get(&self, id: &str) -> Result<Option<Conversation>>;

    /// Delete a conversation. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Append one message to a conversation's history.
    async fn append_message(&self, id: &str, message: Message) -> Result<()>;

    /// Atomically replace the full message sequence (compaction).
    async fn replace_messages(&self, id: &str, messages: Vec<Message>) -> Result<()>;

    /// Set the conversation title.
    async fn set_title(&self, id: &str, title: &str) -> Result<()>;

    /// Set the active model for the conversation.
    async fn set_model(&self, id: &str, model: &str) -> Result<()>;

    /// Record a newly requested tool call.
    async fn record_tool_call(&self, id: &str, record: ToolCallRecord) -> Result<()>;

    /// Advance a tool call's status, optionally attaching output.
    ///
    /// Transitions are monotonic; an attempt to overwrite a terminal status
    /// or move backwards is ignored and returns `Ok(false)`.
    async fn update_tool_call(
        &self,
        id: &str,
        call_id: &str,
        status: ToolCallStatus,
        output: Option<Value>,
    ) -> Result<bool>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory conversation store backed by a `RwLock<HashMap>`.
#[derive(Default)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(id: &str) -> SalonError {
    SalonError::ConversationNotFound(id.to_string())
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create(&self) -> Result<Conversation> {
        let id = uuid::Uuid::new_v4().to_string();
        let conv = Conversation::new(&id);
        self.conversations
            .write()
            .await
            .insert(id, conv.clone());
        Ok(conv)
    }

    async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.conversations.write().await.remove(id).is_some())
    }

    async fn append_message(&self, id: &str, message: Message) -> Result<()> {
        let mut convs = self.conversations.write().await;
        let conv = convs.get_mut(id).ok_or_else(|| not_found(id))?;
        conv.messages.push(message);
        conv.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn replace_messages(&self, id: &str, messages: Vec<Message>) -> Result<()> {
        let mut convs = self.conversations.write().await;
        let conv = convs.get_mut(id).ok_or_else(|| not_found(id))?;
        conv.messages = messages;
        conv.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn set_title(&self, id: &str, title: &str) -> Result<()> {
        let mut convs = self.conversations.write().await;
        let conv = convs.get_mut(id).ok_or_else(|| not_found(id))?;
        conv.title = Some(title.to_string());
        conv.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn set_model(&self, id: &str, model: &str) -> Result<()> {
        let mut convs = self.conversations.write().await;
        let conv = convs.get_mut(id).ok_or_else(|| not_found(id))?;
        conv.model = Some(model.to_string());
        conv.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn record_tool_call(&self, id: &str, record: ToolCallRecord) -> Result<()> {
        let mut convs = self.conversations.write().await;
        let conv = convs.get_mut(id).ok_or_else(|| not_found(id))?;
        conv.tool_calls.push(record);
        Ok(())
    }

    async fn update_tool_call(
        &self,
        id: &str,
        call_id: &str,
        status: ToolCallStatus,
        output: Option<Value>,
    ) -> Result<bool> {
        let mut convs = self.conversations.write().await;
        let conv = convs.get_mut(id).ok_or_else(|| not_found(id))?;
        // newest record wins when a model reuses a call id across iterations
        let Some(record) = conv.tool_calls.iter_mut().rev().find(|r| r.id == call_id) else {
            return Ok(false);
        };
        if !record.status.can_transition_to(status) {
            warn!(
                call_id,
                from = %record.status,
                to = %status,
                "ignoring non-monotonic tool call transition"
            );
            return Ok(false);
        }
        record.status = status;
        if output.is_some() {
            record.output = output;
        }
        Ok(true)
    }
}

// ============================================================================
// Turn control: execution locks + cancellation flags
// ============================================================================

struct TurnState {
    lock: Arc<Mutex<()>>,
    cancelled: Arc<AtomicBool>,
}

/// Per-conversation execution locks and cancellation flags.
///
/// Cloning shares the underlying table.
#[derive(Clone, Default)]
pub struct ConversationControl {
    states: Arc<Mutex<HashMap<String, Arc<TurnState>>>>,
}

/// Cooperative cancellation flag, polled at suspension points.
///
/// Setting it never interrupts in-flight work; a running shell command
/// completes or times out on its own.
#[derive(Clone, Debug)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Held for the duration of one turn; releasing it (by drop) frees the
/// conversation for the next submission.
#[derive(Debug)]
pub struct TurnGuard {
    _permit: OwnedMutexGuard<()>,
    cancel: CancelFlag,
}

impl TurnGuard {
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}

impl ConversationControl {
    pub fn new() -> Self {
        Self::default()
    }

    async fn state(&self, id: &str) -> Arc<TurnState> {
        let mut states = self.states.lock().await;
        states
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(TurnState {
                    lock: Arc::new(Mutex::new(())),
                    cancelled: Arc::new(AtomicBool::new(false)),
                })
            })
            .clone()
    }

    /// Try to begin a turn. Fails fast with `ConversationBusy` when another
    /// turn currently holds this conversation's lock; no state is mutated.
    pub async fn try_begin(&self, id: &str) -> Result<TurnGuard> {
        let state = self.state(id).await;
        let permit = state
            .lock
            .clone()
            .try_lock_owned()
            .map_err(|_| SalonError::ConversationBusy(id.to_string()))?;
        // fresh flag for the new turn
        state.cancelled.store(false, Ordering::SeqCst);
        Ok(TurnGuard {
            _permit: permit,
            cancel: CancelFlag(state.cancelled.clone()),
        })
    }

    /// Request cancellation of the conversation's in-flight turn, if any.
    pub async fn request_cancel(&self, id: &str) -> bool {
        let states = self.states.lock().await;
        match states.get(id) {
            Some(state) => {
                state.cancelled.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Whether a turn currently holds the conversation's lock.
    pub async fn is_busy(&self, id: &str) -> bool {
        let states = self.states.lock().await;
        match states.get(id) {
            Some(state) => state.lock.try_lock().is_err(),
            None => false,
        }
    }

    /// Drop lock state for a deleted conversation.
    pub async fn forget(&self, id: &str) {
        self.states.lock().await.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_create_and_get() {
        let store = MemoryStore::new();
        let conv = store.create().await.unwrap();
        let fetched = store.get(&conv.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, conv.id);
        assert!(fetched.messages.is_empty());
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_to_missing_conversation() {
        let store = MemoryStore::new();
        let err = store
            .append_message("nope", Message::user("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, SalonError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn test_replace_messages_is_atomic_swap() {
        let store = MemoryStore::new();
        let conv = store.create().await.unwrap();
        for i in 0..5 {
            store
                .append_message(&conv.id, Message::user(&format!("m{i}")))
                .await
                .unwrap();
        }
        store
            .replace_messages(&conv.id, vec![Message::system("summary")])
            .await
            .unwrap();
        let conv = store.get(&conv.id).await.unwrap().unwrap();
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.messages[0].role, Role::System);
    }

    #[tokio::test]
    async fn test_tool_call_terminal_status_write_once() {
        let store = MemoryStore::new();
        let conv = store.create().await.unwrap();
        store
            .record_tool_call(&conv.id, ToolCallRecord::new("c1", "shell", json!({})))
            .await
            .unwrap();

        assert!(store
            .update_tool_call(&conv.id, "c1", ToolCallStatus::Running, None)
            .await
            .unwrap());
        assert!(store
            .update_tool_call(&conv.id, "c1", ToolCallStatus::Succeeded, Some(json!("ok")))
            .await
            .unwrap());

        // terminal status must not be overwritten
        assert!(!store
            .update_tool_call(&conv.id, "c1", ToolCallStatus::Failed, None)
            .await
            .unwrap());
        let conv = store.get(&conv.id).await.unwrap().unwrap();
        assert_eq!(conv.tool_calls[0].status, ToolCallStatus::Succeeded);
        assert_eq!(conv.tool_calls[0].output, Some(json!("ok")));
    }

    #[tokio::test]
    async fn test_try_begin_rejects_second_caller() {
        let control = ConversationControl::new();
        let guard = control.try_begin("conv-1").await.unwrap();

        let err = control.try_begin("conv-1").await.unwrap_err();
        assert!(matches!(err, SalonError::ConversationBusy(_)));
        assert!(control.is_busy("conv-1").await);

        // a different conversation is unaffected
        let _other = control.try_begin("conv-2").await.unwrap();

        drop(guard);
        let _again = control.try_begin("conv-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_flag_reset_on_new_turn() {
        let control = ConversationControl::new();
        {
            let guard = control.try_begin("conv-1").await.unwrap();
            let flag = guard.cancel_flag();
            assert!(!flag.is_set());
            control.request_cancel("conv-1").await;
            assert!(flag.is_set());
        }
        let guard = control.try_begin("conv-1").await.unwrap();
        assert!(!guard.cancel_flag().is_set());
    }

    #[tokio::test]
    async fn test_cancel_unknown_conversation() {
        let control = ConversationControl::new();
        assert!(!control.request_cancel("ghost").await);
    }
}
