use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Token not found: {0}")]
    TokenNotFound(String),

    #[error("Desk not found: {0}")]
    DeskNotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// A conditional write lost against a concurrent writer.
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Queue is at capacity ({0} tokens)")]
    QueueFull(usize),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::TokenNotFound(_) | QueueError::DeskNotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, QueueError::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
