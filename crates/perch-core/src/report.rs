//! Reporting collaborator interface.
//!
//! The engine emits structured events at a handful of call sites (request
//! begin/end, app errors, unknown errors, ...). A [`Reporter`] receives them
//! fire-and-forget: reporting must never fail the request that triggered it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity of a reported event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportLevel {
    /// Informational.
    #[default]
    Info,
    /// Something unexpected that did not break the request.
    Warn,
    /// A failed request or component.
    Error,
}

/// What kind of call site produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Plain log line.
    Log,
    /// A request entered the application.
    Begin,
    /// A request left the application.
    End,
    /// An error escaped into the application layer.
    AppError,
    /// A database failure.
    ///
    /// Never emitted by the framework; reserved for applications reporting
    /// their storage errors through the same [`Reporter`].
    DbError,
    /// An error outside the framework taxonomy.
    UnknownError,
}

/// Reporting overrides that travel with a request-time error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogOptions {
    /// Report key; the handler picks a default when absent.
    pub key: Option<String>,
    /// Extra message for the report (not the response body).
    pub msg: Option<String>,
    /// Severity override.
    pub level: Option<ReportLevel>,
    /// Structured extra data.
    pub details: Option<Value>,
}

impl LogOptions {
    /// Options with only a key.
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Default::default()
        }
    }

    /// Sets the message.
    pub fn msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    /// Sets the level.
    pub fn level(mut self, level: ReportLevel) -> Self {
        self.level = Some(level);
        self
    }
}

/// A structured event handed to the [`Reporter`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEvent {
    pub kind: ReportKind,
    pub level: ReportLevel,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ReportEvent {
    /// Creates an event of the given kind.
    pub fn new(kind: ReportKind, key: impl Into<String>) -> Self {
        let level = match kind {
            ReportKind::Log | ReportKind::Begin | ReportKind::End => ReportLevel::Info,
            ReportKind::AppError | ReportKind::DbError | ReportKind::UnknownError => {
                ReportLevel::Error
            }
        };
        Self {
            kind,
            level,
            key: key.into(),
            msg: None,
            error: None,
            fetch_id: None,
            details: None,
        }
    }

    /// Shorthand for a [`ReportKind::Log`] event.
    pub fn log(key: impl Into<String>) -> Self {
        Self::new(ReportKind::Log, key)
    }

    pub fn msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    pub fn error(mut self, error: impl std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn level(mut self, level: ReportLevel) -> Self {
        self.level = level;
        self
    }

    pub fn fetch_id(mut self, fetch_id: impl Into<String>) -> Self {
        self.fetch_id = Some(fetch_id.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Applies the overrides carried by an error.
    pub fn with_options(mut self, options: &LogOptions) -> Self {
        if let Some(key) = &options.key {
            self.key.clone_from(key);
        }
        if let Some(msg) = &options.msg {
            self.msg = Some(msg.clone());
        }
        if let Some(level) = options.level {
            self.level = level;
        }
        if let Some(details) = &options.details {
            self.details = Some(details.clone());
        }
        self
    }
}

/// Sink for [`ReportEvent`]s.
pub trait Reporter: Send + Sync {
    /// Records an event. Must not panic.
    fn report(&self, event: ReportEvent);
}

/// A reporter that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _event: ReportEvent) {}
}
