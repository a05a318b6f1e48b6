use thiserror::Error;

use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum RelioError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Contact not found: {0}")]
    ContactNotFound(String),

    #[error("Contact already exists: {0}")]
    DuplicateContact(String),

    #[error("Conversation turn not found: {0}")]
    TurnNotFound(String),

    #[error("Memory not found: {0}")]
    MemoryNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl RelioError {
    /// Text suitable for showing to the person using the tool.
    pub fn user_notice(&self) -> String {
        match self {
            RelioError::Llm(err) => err.user_notice(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelioError>;
