//! Unified error types for the Perch core.
//!
//! Two families of errors exist:
//!
//! - [`StructuralError`]: raised while controllers and filters are being
//!   registered. These abort startup; nothing is left half-registered.
//! - [`DispatchError`]: raised while a single request travels through the
//!   dispatch pipeline. The top-level request handler classifies them into an
//!   HTTP response and a report.

use http::StatusCode;
use thiserror::Error;

use crate::report::LogOptions;
use crate::result::JsonBody;

/// A boxed, thread-safe error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Structural Errors
// =============================================================================

/// Errors detected while building the controller table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    /// The controller does not extend the application's base controller.
    #[error("controller '{controller}' does not extend the base controller")]
    MissingBaseController {
        /// The offending controller.
        controller: String,
    },

    /// Two controllers share a name (case-insensitively).
    #[error("duplicate controller name '{name}'")]
    DuplicateController {
        /// The lowercased registry key.
        name: String,
    },

    /// Two actions of one controller share a name (case-insensitively).
    #[error("duplicate action '{action}' in controller '{controller}'")]
    DuplicateAction {
        /// The owning controller.
        controller: String,
        /// The lowercased action key.
        action: String,
    },

    /// The same filter was attached twice to one target.
    #[error("filter '{filter}' is already attached to '{target}'")]
    DuplicateFilter {
        /// The filter name.
        filter: String,
        /// The controller or action the filter was attached to.
        target: String,
    },
}

// =============================================================================
// Dispatch Errors
// =============================================================================

/// A request failure carrying an explicit HTTP status.
///
/// Built either from a bare status or a `{status, msg}` pair.
#[derive(Debug, Clone, Error)]
#[error("request failed with status {status}")]
pub struct StatusError {
    /// The HTTP status to answer with.
    pub status: StatusCode,
    /// Optional response body; defaults to the canonical reason phrase.
    pub msg: Option<String>,
    /// Reporting overrides.
    pub log: LogOptions,
}

impl StatusError {
    /// Creates a status error without a message.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            msg: None,
            log: LogOptions::default(),
        }
    }

    /// Creates a status error with a response message.
    pub fn with_msg(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            msg: Some(msg.into()),
            log: LogOptions::default(),
        }
    }

    /// Shorthand for a 404.
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    /// Attaches reporting overrides.
    pub fn log(mut self, log: LogOptions) -> Self {
        self.log = log;
        self
    }

    /// The body text sent to the client.
    pub fn body(&self) -> String {
        self.msg.clone().unwrap_or_else(|| {
            self.status
                .canonical_reason()
                .unwrap_or("Unknown Status")
                .to_string()
        })
    }
}

impl From<StatusCode> for StatusError {
    fn from(status: StatusCode) -> Self {
        Self::new(status)
    }
}

/// Errors that abort a single request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Terminate with an explicit status.
    #[error(transparent)]
    Status(StatusError),

    /// Terminate with a JSON body (for example a business error code).
    #[error("json error response with code {}", .body.code)]
    Json {
        /// The body to render.
        body: JsonBody,
        /// Reporting overrides.
        log: LogOptions,
    },

    /// A framework-level failure that always surfaces as HTTP 500.
    #[error("server error: {msg}")]
    Server {
        /// Message sent as the 500 body.
        msg: String,
        /// Reporting overrides.
        log: LogOptions,
        /// Underlying cause, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The operation was superseded by a newer one under the same group key.
    ///
    /// Only used to unwind; never reported.
    #[error("operation superseded")]
    Superseded,

    /// Any error that is not part of the framework taxonomy.
    #[error("unknown error: {0}")]
    Unknown(#[source] BoxError),
}

impl DispatchError {
    /// Creates a server error with the given message.
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server {
            msg: msg.into(),
            log: LogOptions::default(),
            source: None,
        }
    }

    /// Creates a server error with a report key.
    pub fn server_keyed(msg: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Server {
            msg: msg.into(),
            log: LogOptions::keyed(key),
            source: None,
        }
    }

    /// Wraps a lower-level failure as a server error.
    pub fn server_from(
        msg: impl Into<String>,
        key: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Server {
            msg: msg.into(),
            log: LogOptions::keyed(key),
            source: Some(source.into()),
        }
    }

    /// Creates a status error from a bare status code.
    pub fn status(status: StatusCode) -> Self {
        Self::Status(StatusError::new(status))
    }

    /// Creates a status error with a message.
    pub fn status_msg(status: StatusCode, msg: impl Into<String>) -> Self {
        Self::Status(StatusError::with_msg(status, msg))
    }

    /// Creates a JSON error response.
    pub fn json(body: JsonBody) -> Self {
        Self::Json {
            body,
            log: LogOptions::default(),
        }
    }

    /// Wraps an arbitrary error.
    pub fn unknown(err: impl Into<BoxError>) -> Self {
        Self::Unknown(err.into())
    }

    /// Returns `true` for the silent superseded marker.
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }

    /// The HTTP status this error maps to, if it produces a response.
    pub fn http_status(&self) -> Option<StatusCode> {
        match self {
            Self::Status(e) => Some(e.status),
            Self::Json { .. } => Some(StatusCode::OK),
            Self::Server { .. } | Self::Unknown(_) => Some(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Superseded => None,
        }
    }

    /// Reporting overrides attached to the error.
    pub fn log_options(&self) -> Option<&LogOptions> {
        match self {
            Self::Status(e) => Some(&e.log),
            Self::Json { log, .. } | Self::Server { log, .. } => Some(log),
            Self::Superseded | Self::Unknown(_) => None,
        }
    }
}

impl From<StatusError> for DispatchError {
    fn from(err: StatusError) -> Self {
        Self::Status(err)
    }
}

impl From<StatusCode> for DispatchError {
    fn from(status: StatusCode) -> Self {
        Self::status(status)
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unknown(Box::new(err))
    }
}

impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        Self::Unknown(Box::new(err))
    }
}

/// Result type for request-time operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_body_falls_back_to_reason() {
        assert_eq!(StatusError::not_found().body(), "Not Found");
        assert_eq!(
            StatusError::with_msg(StatusCode::NOT_FOUND, "please use https").body(),
            "please use https"
        );
    }

    #[test]
    fn superseded_has_no_status() {
        assert!(DispatchError::Superseded.is_superseded());
        assert_eq!(DispatchError::Superseded.http_status(), None);
        assert_eq!(
            DispatchError::server("Router Return Error").http_status(),
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        );
    }
}
