//! Error types for Salon.
//!
//! A single `SalonError` enum covers every failure surface of the core, with
//! a `Result<T>` alias used throughout the crate. Tool-level failures are
//! deliberately *not* errors: they become `ToolResult` values fed back to the
//! model, so only genuinely exceptional conditions appear here.

use thiserror::Error;

/// Top-level error type for all Salon operations.
#[derive(Error, Debug)]
pub enum SalonError {
    /// Configuration loading or validation error
    #[error("Config error: {0}")]
    Config(String),

    /// Model provider error (API failure, malformed response, stream drop)
    #[error("Provider error: {0}")]
    Provider(String),

    /// A turn is already in flight on this conversation
    #[error("Conversation busy: {0}")]
    ConversationBusy(String),

    /// Conversation does not exist (or was deleted mid-turn)
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    /// Tool infrastructure error (registry, dispatch plumbing)
    #[error("Tool error: {0}")]
    Tool(String),

    /// Compaction refused or failed
    #[error("Compaction error: {0}")]
    Compaction(String),

    /// Approval coordination error
    #[error("Approval error: {0}")]
    Approval(String),

    /// Event bus subscriber queue error
    #[error("Bus error: {0}")]
    Bus(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Salon operations.
pub type Result<T> = std::result::Result<T, SalonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SalonError::ConversationBusy("conv-1".to_string());
        assert_eq!(err.to_string(), "Conversation busy: conv-1");

        let err = SalonError::Provider("rate limited".to_string());
        assert_eq!(err.to_string(), "Provider error: rate limited");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: SalonError = io_err.into();
        assert!(matches!(err, SalonError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: SalonError = json_err.into();
        assert!(matches!(err, SalonError::Json(_)));
    }
}
