/// Errors that can occur at the storage boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A required record was not found.
    #[error("store: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// The backing store could not be reached or timed out. Transient from
    /// the scheduler's point of view: the affected org or tick is skipped.
    #[error("store: backend unavailable: {0}")]
    Unavailable(String),

    /// JSON serialization or deserialization failure (e.g. label columns).
    #[error("store: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic storage error for cases not covered by other variants.
    #[error("store: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
