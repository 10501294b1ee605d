//! Error types for mnemo.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MnemoError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Session cache error: {0}")]
    Cache(String),

    #[error("Completion service error: {0}")]
    Llm(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MnemoError>;
