// Central Error Type for the Application

use thiserror::Error;

use crate::domain::DomainError;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] crate::port::ProtocolError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Execution error: {0}")]
    Execution(#[from] crate::port::ExecutionError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::ValidationError(_) | DomainError::InvalidCronExpression { .. } => {
                AppError::Validation(err.to_string())
            }
            DomainError::InvalidStateTransition { .. } => AppError::InvalidState(err.to_string()),
        }
    }
}

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to AppError::Persistence(String)
