//! Error types for Mnemon

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for Mnemon operations
pub type Result<T> = std::result::Result<T, MnemonError>;

/// Main error type for Mnemon
#[derive(Error, Debug)]
pub enum MnemonError {
    #[error("Memory not found: {0}")]
    MemoryNotFound(Uuid),

    #[error("Decision trace not found: {0}")]
    TraceNotFound(Uuid),

    #[error("Outcome already observed for trace {0}")]
    AlreadyObserved(Uuid),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Dependency unavailable: {0}")]
    Unavailable(String),

    #[error("Ranking source not supported by backend: {0}")]
    Unsupported(&'static str),

    #[error("Storage error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MnemonError {
    /// Check if error is retryable (by the scheduler/caller, never by the core)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MnemonError::Persistence(_) | MnemonError::Unavailable(_)
        )
    }

    /// Errors a single retrieval source may fail with without failing retrieval
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            MnemonError::Unavailable(_) | MnemonError::Unsupported(_)
        )
    }
}
