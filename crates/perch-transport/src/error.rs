//! Transport error types.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors raised by the HTTP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The requested address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The serve loop terminated with an error.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    /// The request body exceeded the configured limit.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge {
        /// The limit in bytes.
        limit: usize,
    },

    /// The request body could not be read or decoded.
    #[error("invalid request body: {0}")]
    InvalidBody(String),
}

impl TransportError {
    /// Status answered when a request cannot be turned into a context.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Bind { .. } | Self::Serve(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
