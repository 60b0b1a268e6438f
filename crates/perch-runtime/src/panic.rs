//! Reporting of panics that happen outside any request.
//!
//! Panics inside a request are caught by the entry and reported as
//! `app_error`. Everything else (spawned tasks, background threads) reaches
//! the process panic hook, which reports `process_uncaughtException` to the
//! application's reporter and then defers to the hook it replaced.

use std::panic::{self, PanicHookInfo};
use std::sync::{Arc, Once};

use parking_lot::RwLock;
use perch_core::{ReportEvent, ReportKind, Reporter, RequestContext};
use serde_json::json;

use crate::entry::panic_message;

/// Report key of panics outside any request.
pub const UNCAUGHT_PANIC_KEY: &str = "process_uncaughtException";

static REPORTER: RwLock<Option<Arc<dyn Reporter>>> = parking_lot::const_rwlock(None);
static HOOK: Once = Once::new();

/// Routes uncaught panics to `reporter`.
///
/// The process hook is installed once; later calls only swap the reporter,
/// so the most recently initialized application receives the reports.
pub fn install(reporter: Arc<dyn Reporter>) {
    *REPORTER.write() = Some(reporter);
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            report(info);
            previous(info);
        }));
    });
}

/// Stops reporting; the installed hook keeps deferring to the previous one.
pub fn uninstall() {
    *REPORTER.write() = None;
}

fn report(info: &PanicHookInfo<'_>) {
    // Request panics are answered and reported by the entry.
    if RequestContext::current().is_some() {
        return;
    }
    let Some(reporter) = REPORTER.read().clone() else {
        return;
    };

    let mut event = ReportEvent::new(ReportKind::AppError, UNCAUGHT_PANIC_KEY)
        .msg(panic_message(info.payload()).unwrap_or_else(|| "panicked".to_string()));
    if let Some(location) = info.location() {
        event = event.details(json!({ "location": location.to_string() }));
    }
    reporter.report(event);
}
