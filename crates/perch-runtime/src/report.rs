//! Reporting through `tracing`.

use perch_core::{ReportEvent, ReportKind, ReportLevel, Reporter};
use tracing::{error, info, warn};

/// A [`Reporter`] that turns every event into a structured `tracing` event
/// under the `perch::report` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl TracingReporter {
    pub fn new() -> Self {
        Self
    }
}

fn kind_str(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::Log => "log",
        ReportKind::Begin => "begin",
        ReportKind::End => "end",
        ReportKind::AppError => "app_error",
        ReportKind::DbError => "db_error",
        ReportKind::UnknownError => "unknown_error",
    }
}

impl Reporter for TracingReporter {
    fn report(&self, event: ReportEvent) {
        let kind = kind_str(event.kind);
        let msg = event.msg.as_deref().unwrap_or_default();
        let error = event.error.as_deref().unwrap_or_default();
        let fetch_id = event.fetch_id.as_deref().unwrap_or_default();
        let details = event
            .details
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();

        match event.level {
            ReportLevel::Info => info!(
                target: "perch::report",
                kind, key = %event.key, msg, error, fetch_id, details,
                "{}", event.key
            ),
            ReportLevel::Warn => warn!(
                target: "perch::report",
                kind, key = %event.key, msg, error, fetch_id, details,
                "{}", event.key
            ),
            ReportLevel::Error => error!(
                target: "perch::report",
                kind, key = %event.key, msg, error, fetch_id, details,
                "{}", event.key
            ),
        }
    }
}
