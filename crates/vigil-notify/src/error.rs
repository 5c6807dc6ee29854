/// Errors that can occur within the notification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// An org's fan-out configuration is missing a required field or
    /// contains an invalid value.
    #[error("notify: invalid configuration: {0}")]
    InvalidConfig(String),

    /// Delivery to the external sink failed.
    #[error("notify: delivery failed: {0}")]
    Delivery(String),

    /// Generic notification error for cases not covered by other variants.
    #[error("notify: {0}")]
    Other(String),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
