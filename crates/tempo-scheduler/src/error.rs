use thiserror::Error;

/// Errors that can occur within the scheduling subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No schedule with the given identifier exists in the store.
    #[error("schedule not found: {id}")]
    NotFound { id: String },

    /// An insert collided with an existing identifier. Never retried
    /// automatically — identifier generation is the caller's job.
    #[error("duplicate schedule id: {id}")]
    DuplicateId { id: String },

    /// The delivery capability rejected the message. The entry is left
    /// untouched so a retry of `execute` is safe.
    #[error("delivery failed: {0}")]
    DeliveryFailed(Box<dyn std::error::Error + Send + Sync>),

    /// A stored or supplied recurrence specification cannot be parsed or
    /// evaluated. Surfaced at the boundary, never silently defaulted.
    #[error("malformed recurrence rule: {0}")]
    MalformedRule(String),

    /// The host-supplied payload codec failed to encode or decode.
    #[error("payload codec error: {0}")]
    Payload(String),

    /// Underlying SQLite / rusqlite error, propagated unchanged.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
