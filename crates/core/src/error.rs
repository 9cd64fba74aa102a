//! Error types for the practice engine.
//!
//! Only absence of domain entities, invalid input and concurrency conflicts
//! are surfaced to callers. Failures of the generative service are modelled
//! separately by [`crate::gateway::GatewayError`] and never leave the engine.

use uuid::Uuid;

/// Result alias used by the engine's public operations.
pub type Result<T> = std::result::Result<T, PracticeError>;

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum PracticeError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("concurrent modification: {0}")]
    ConcurrencyConflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PracticeError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }
}

/// Errors produced by repository implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session {session_id} was modified concurrently (expected version {expected})")]
    VersionConflict { session_id: Uuid, expected: i64 },
    #[error("step {step_number} already exists for session {session_id}")]
    DuplicateStep { session_id: Uuid, step_number: u32 },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<StoreError> for PracticeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } | StoreError::DuplicateStep { .. } => {
                PracticeError::ConcurrencyConflict(err.to_string())
            }
            StoreError::Backend(inner) => PracticeError::Internal(inner),
        }
    }
}
