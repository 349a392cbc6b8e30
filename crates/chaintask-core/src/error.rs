//! Error types for the crosscheck + task pipeline.

use thiserror::Error;

/// Errors that can occur while reconciling logs or processing tasks.
#[derive(Debug, Error)]
pub enum ChainTaskError {
    /// Invalid window / cadence parameters. Raised before any scanning starts.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    /// A single provider call exceeded its timeout.
    #[error("Provider call timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// A missing-log callback or a task handler failed.
    #[error("Callback error in '{context}': {reason}")]
    Callback { context: String, reason: String },

    /// A store key could not be decoded.
    #[error("Key format error: {0}")]
    Format(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl ChainTaskError {
    /// Shorthand for a callback failure.
    pub fn callback(context: impl Into<String>, reason: impl ToString) -> Self {
        Self::Callback {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if the error is transient and the call may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(_) | Self::Timeout { .. } | Self::Storage(_)
        )
    }

    /// Returns `true` if the error must surface to the operator instead of
    /// being contained within a tick or a task attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Format(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ChainTaskError::Timeout { ms: 10 }.is_retryable());
        assert!(ChainTaskError::Provider("503".into()).is_retryable());
        assert!(!ChainTaskError::Config("bad".into()).is_retryable());
        assert!(ChainTaskError::Config("bad".into()).is_fatal());
        assert!(ChainTaskError::Format("x".into()).is_fatal());
        assert!(!ChainTaskError::callback("task", "boom").is_fatal());
    }

    #[test]
    fn callback_display() {
        let err = ChainTaskError::callback("onMissingLog", "decode failed");
        assert_eq!(
            err.to_string(),
            "Callback error in 'onMissingLog': decode failed"
        );
    }
}
