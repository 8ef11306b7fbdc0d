//! salon: an embeddable agent execution core.
//!
//! The crate drives bounded tool-calling loops against a streaming chat
//! model: turns are submitted per conversation, tool calls pass through a
//! safety gate and optional human approval, history is compacted when it
//! outgrows its token budget, and every observable step is published on an
//! event bus that any number of clients can subscribe to.

pub mod approval;
pub mod bus;
pub mod compact;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod providers;
pub mod safety;
pub mod tokens;
pub mod tools;
pub mod utils;

pub use config::Config;
pub use engine::{AgentEngine, TurnOutcome, TurnReport, TurnRequest};
pub use error::{Result, SalonError};
