//! Runtime error types.

use perch_core::{BoxError, StructuralError};
use perch_transport::TransportError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that abort application startup or the serve loop.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Controller or filter registration failed.
    #[error("Registration failed: {0}")]
    Registration(#[from] StructuralError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An application hook failed during startup.
    #[error("Hook {hook} failed: {source}")]
    Hook {
        hook: &'static str,
        #[source]
        source: BoxError,
    },
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
