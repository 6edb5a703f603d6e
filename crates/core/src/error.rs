use thiserror::Error;

pub type LoyaltyResult<T> = Result<T, LoyaltyError>;

#[derive(Error, Debug)]
pub enum LoyaltyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Receipt validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conditional update lost: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LoyaltyError {
    /// Whether the error came from the backing store rather than the input.
    pub fn is_persistence(&self) -> bool {
        matches!(self, LoyaltyError::Persistence(_) | LoyaltyError::Conflict(_))
    }
}
