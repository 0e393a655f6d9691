//! Error types for the kbchat domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// The top-level error type for all kbchat operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Backend errors ---
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    // --- Knowledge errors ---
    #[error("Knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures raised by an inference backend adapter.
///
/// `Config` is only produced while the router is being built; the other three
/// are generation-time failures that the router turns into a textual reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Backend configuration error: {0}")]
    Config(String),
}

impl BackendError {
    /// Short, stable label for the failure category.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "backend_unavailable",
            Self::Transport(_) => "transport_error",
            Self::GenerationFailed(_) => "generation_failed",
            Self::Config(_) => "config_error",
        }
    }

    /// The underlying detail without the category prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::Unavailable(d)
            | Self::Transport(d)
            | Self::GenerationFailed(d)
            | Self::Config(d) => d,
        }
    }
}

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_displays_correctly() {
        let err = Error::Backend(BackendError::Transport("connection refused".into()));
        assert!(err.to_string().contains("Transport error"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn backend_error_category_and_detail() {
        let err = BackendError::GenerationFailed("empty body".into());
        assert_eq!(err.category(), "generation_failed");
        assert_eq!(err.detail(), "empty body");
        assert_eq!(
            BackendError::Unavailable(String::new()).category(),
            "backend_unavailable"
        );
    }

    #[test]
    fn knowledge_error_converts() {
        let err: Error = KnowledgeError::Storage("read-only filesystem".into()).into();
        assert!(err.to_string().contains("read-only filesystem"));
    }
}
