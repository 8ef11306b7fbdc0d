//! Approval coordination for destructive tool calls.
//!
//! An [`ApprovalCoordinator`] tracks pending approval requests across
//! possibly-disconnected observers. Each request resolves exactly once:
//! by an approve/deny response, by its deadline elapsing, or by the stale
//! sweep. A second response for an already-resolved request is a no-op.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

/// Longest description we keep; anything past this is noise for a human.
const MAX_DESCRIPTION_CHARS: usize = 10_000;

/// How a pending approval ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalVerdict {
    Approved,
    Denied,
    TimedOut,
}

struct Pending {
    tx: oneshot::Sender<bool>,
    conversation: String,
    created_at: DateTime<Utc>,
}

/// Receiver half handed to the requester; paired with [`ApprovalCoordinator::wait`].
pub struct ApprovalWaiter {
    id: String,
    rx: oneshot::Receiver<bool>,
}

/// Tracks and resolves approval requests.
pub struct ApprovalCoordinator {
    pending: Mutex<HashMap<String, Pending>>,
    /// How long `wait` blocks before timing out
    timeout: Duration,
    /// Age past which `expire_stale` denies an unanswered request
    expire_after: Duration,
}

impl ApprovalCoordinator {
    pub fn new(timeout_secs: u64, expire_secs: u64) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout: Duration::from_secs(timeout_secs),
            expire_after: Duration::from_secs(expire_secs),
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }

    /// Register a new approval request.
    ///
    /// Returns the request id (for correlating the eventual response) and
    /// the waiter to pass to [`wait`]. The description is truncated to
    /// 10,000 chars.
    ///
    /// [`wait`]: ApprovalCoordinator::wait
    pub async fn request(&self, conversation: &str, description: &str) -> (String, ApprovalWaiter) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        let description = crate::utils::string::prefix_chars(description, MAX_DESCRIPTION_CHARS);
        debug!(approval_id = %id, conversation, %description, "approval requested");

        self.pending.lock().await.insert(
            id.clone(),
            Pending {
                tx,
                conversation: conversation.to_string(),
                created_at: Utc::now(),
            },
        );

        (id.clone(), ApprovalWaiter { id, rx })
    }

    /// Block until the request resolves or the deadline elapses.
    ///
    /// A timeout removes the pending entry, so a late response becomes a
    /// no-op rather than resolving a ghost.
    pub async fn wait(&self, waiter: ApprovalWaiter) -> ApprovalVerdict {
        match tokio::time::timeout(self.timeout, waiter.rx).await {
            Ok(Ok(true)) => ApprovalVerdict::Approved,
            Ok(Ok(false)) => ApprovalVerdict::Denied,
            // sender dropped without resolving (coordinator expired it)
            Ok(Err(_)) => ApprovalVerdict::TimedOut,
            Err(_) => {
                self.pending.lock().await.remove(&waiter.id);
                info!(approval_id = %waiter.id, "approval timed out");
                ApprovalVerdict::TimedOut
            }
        }
    }

    /// Resolve a pending request. Returns whether this call resolved it.
    ///
    /// Unknown ids and already-resolved requests return `false` without
    /// touching any state (idempotent-safe).
    pub async fn resolve(&self, id: &str, approved: bool) -> bool {
        let entry = self.pending.lock().await.remove(id);
        match entry {
            Some(pending) => {
                info!(approval_id = %id, conversation = %pending.conversation, approved, "approval resolved");
                // a failed send means the requester gave up waiting; the
                // request still counts as resolved exactly once
                let _ = pending.tx.send(approved);
                true
            }
            None => {
                debug!(approval_id = %id, "response for unknown or already-resolved approval ignored");
                false
            }
        }
    }

    /// Deny requests that outlived the expiry window. Returns how many were
    /// expired.
    pub async fn expire_stale(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.expire_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(600));
        let mut pending = self.pending.lock().await;
        let stale: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.created_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            if let Some(p) = pending.remove(id) {
                warn!(approval_id = %id, "expiring stale approval request");
                let _ = p.tx.send(false);
            }
        }
        stale.len()
    }

    /// Number of unresolved requests.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl Default for ApprovalCoordinator {
    fn default() -> Self {
        Self::new(300, 600)
    }
}
