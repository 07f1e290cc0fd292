// Conversion backend module
// Typed HTTP access to the remote conversion service.

pub mod client;
pub mod types;

pub use client::BackendClient;
pub use types::*;

use thiserror::Error;

/// Backend call failure
#[derive(Debug, Error)]
pub enum BackendError {
    /// Connection refused, timeout, TLS failure...
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Success status but the body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::Http { status: 404, .. })
    }
}
