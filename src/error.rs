//! Application-wide error types using thiserror
//!
//! Errors crossing module boundaries are wrapped in `AppError`. The state
//! store's public operations deliberately do not use this type: per their
//! contract they log failures and report them as `bool`/default values.

use thiserror::Error;

use crate::core::events::NotifyError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Module error: {0}")]
    Module(String),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
