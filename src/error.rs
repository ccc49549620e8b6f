use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Optimizer error: {0}")]
    Optimizer(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Clone for DbError {
    fn clone(&self) -> Self {
        match self {
            DbError::Io(e) => DbError::Storage(e.to_string()),
            DbError::Storage(s) => DbError::Storage(s.clone()),
            DbError::Index(s) => DbError::Index(s.clone()),
            DbError::Optimizer(s) => DbError::Optimizer(s.clone()),
            DbError::Execution(s) => DbError::Execution(s.clone()),
            DbError::NotFound(s) => DbError::NotFound(s.clone()),
            DbError::InvalidArgument(s) => DbError::InvalidArgument(s.clone()),
            DbError::InvalidOperation(s) => DbError::InvalidOperation(s.clone()),
            DbError::OutOfMemory(s) => DbError::OutOfMemory(s.clone()),
            DbError::ResourceExhausted(s) => DbError::ResourceExhausted(s.clone()),
            DbError::Configuration(s) => DbError::Configuration(s.clone()),
            DbError::Cancelled(s) => DbError::Cancelled(s.clone()),
            DbError::Validation(s) => DbError::Validation(s.clone()),
            DbError::Internal(s) => DbError::Internal(s.clone()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
