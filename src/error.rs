//! Error types for the chat core.

use thiserror::Error;

/// Failures the chat core can observe.
///
/// None of these are fatal to a session: remote and logging failures are
/// recovered where they happen, and anything unexpected is turned into an
/// apology message by the orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The tenant Q&A endpoint could not be reached or returned garbage.
    #[error("remote Q&A lookup failed: {0}")]
    RemoteLookupFailed(String),

    /// Reporting an unanswered question failed.
    #[error("unanswered-question logging failed: {0}")]
    LoggingFailed(String),

    /// Anything else that went wrong while producing a reply.
    #[error("unexpected failure: {0}")]
    Unexpected(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// The knowledge seed file could not be read or parsed.
    #[error("knowledge seed error: {0}")]
    Seed(String),
}

impl ChatError {
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteLookupFailed(message.into())
    }

    pub fn logging(message: impl Into<String>) -> Self {
        Self::LoggingFailed(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn seed(message: impl Into<String>) -> Self {
        Self::Seed(message.into())
    }

    /// True for failures the resolver recovers from by searching locally.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteLookupFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = ChatError::remote("connection refused");
        assert_eq!(
            err.to_string(),
            "remote Q&A lookup failed: connection refused"
        );
        assert!(err.is_remote());
        assert!(!ChatError::logging("500").is_remote());
    }
}
