//! Event bus: per-conversation publish/subscribe fan-out.
//!
//! Topics are keyed by `(database, conversation)`, with an additional
//! database-wide topic for lifecycle events. Each subscription owns a
//! bounded queue; publishing snapshots the current subscriber list, enqueues
//! without blocking, and drops the event with a warning when a subscriber's
//! queue is full. A subscriber never receives an echo of its own action:
//! envelopes whose origin matches the subscriber's client id are skipped.

mod event;

pub use event::{Envelope, Event};

use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Capacity of each subscriber's queue.
pub const SUBSCRIBER_BUFFER: usize = 256;

/// Event scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// One conversation within a database
    Conversation {
        database: String,
        conversation: String,
    },
    /// Database-wide lifecycle events (conversation created/deleted,
    /// approvals visible to any attached client)
    Database { database: String },
}

impl Topic {
    pub fn conversation(database: &str, conversation: &str) -> Self {
        Self::Conversation {
            database: database.to_string(),
            conversation: conversation.to_string(),
        }
    }

    pub fn database(database: &str) -> Self {
        Self::Database {
            database: database.to_string(),
        }
    }

    fn key(&self) -> String {
        match self {
            Self::Conversation {
                database,
                conversation,
            } => format!("conversation:{database}:{conversation}"),
            Self::Database { database } => format!("database:{database}"),
        }
    }
}

struct Subscriber {
    client: String,
    tx: mpsc::Sender<Envelope>,
}

/// A live subscription; drop it to disconnect.
pub struct Subscription {
    /// Client identifier used for echo suppression
    pub client: String,
    rx: mpsc::Receiver<Envelope>,
}

impl Subscription {
    /// Receive the next envelope; `None` when the bus side is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

/// Publish/subscribe fan-out for all observers of all conversations.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a client to a topic.
    pub fn subscribe(&self, topic: &Topic, client: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.entry(topic.key()).or_default().push(Subscriber {
            client: client.to_string(),
            tx,
        });
        debug!(topic = %topic.key(), client, "subscribed");
        Subscription {
            client: client.to_string(),
            rx,
        }
    }

    /// Publish an event to all current subscribers of a topic.
    ///
    /// The subscriber list is snapshotted before delivery; subscribers added
    /// mid-publish see only later events. Delivery never blocks: a full
    /// queue drops this event for that subscriber with a warning. The
    /// originating client is skipped entirely (echo suppression).
    pub fn publish(&self, topic: &Topic, origin: &str, event: Event) {
        let key = topic.key();
        let envelope = Envelope {
            origin: origin.to_string(),
            event,
        };

        let snapshot: Vec<(String, mpsc::Sender<Envelope>)> = {
            let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            match subs.get(&key) {
                Some(list) => list
                    .iter()
                    .map(|s| (s.client.clone(), s.tx.clone()))
                    .collect(),
                None => return,
            }
        };

        let mut any_closed = false;
        for (client, tx) in &snapshot {
            if client == origin {
                continue;
            }
            match tx.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(topic = %key, client, "subscriber queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    any_closed = true;
                }
            }
        }

        if any_closed {
            let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
            if let Some(list) = subs.get_mut(&key) {
                list.retain(|s| !s.tx.is_closed());
                if list.is_empty() {
                    subs.remove(&key);
                }
            }
        }
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        subs.get(&topic.key()).map_or(0, |list| list.len())
    }
}
