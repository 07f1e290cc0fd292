// KiCad Courier Error Types

use thiserror::Error;

use crate::backend::BackendError;
use crate::constants::BACKEND_UNREACHABLE_MESSAGE;

#[derive(Error, Debug)]
pub enum CourierError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{msg}", msg = BACKEND_UNREACHABLE_MESSAGE)]
    BackendUnreachable,

    #[error("Backend error {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("{0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl CourierError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CourierError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CourierError::NotFound(msg.into())
    }

    /// True when the error means the backend could not be reached at all.
    pub fn is_offline(&self) -> bool {
        matches!(self, CourierError::BackendUnreachable)
    }
}

impl From<BackendError> for CourierError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Transport(_) => CourierError::BackendUnreachable,
            BackendError::Http { status, body } => CourierError::Backend { status, body },
            BackendError::Decode(msg) => CourierError::Other(format!("Invalid backend response: {}", msg)),
        }
    }
}

impl From<anyhow::Error> for CourierError {
    fn from(err: anyhow::Error) -> Self {
        CourierError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CourierError>;
