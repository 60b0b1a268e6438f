//! Perch Runtime - application assembly for the Perch framework.
//!
//! This crate provides:
//! - Layered configuration (`PerchConfig`, `ConfigLoader`)
//! - Logging setup on `tracing-subscriber`
//! - The per-request entry lifecycle (`AppEntry`)
//! - Application hooks, reporting and request tracing
//! - Reporting of panics outside any request
//! - Startup and graceful shutdown (`PerchApp`, `ReadyApp`)
//!
//! ```ignore
//! use perch_runtime::PerchApp;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = PerchApp::new();
//!     let index = ControllerDef::builder("index")
//!         .extends(app.base_controller())
//!         .action("index", hello)
//!         .build()?;
//!
//!     app.controller(index).run().await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod entry;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod panic;
pub mod report;
pub mod trace;

pub use app::{AppBuilder, PerchApp, ReadyApp};
pub use config::{ConfigError, ConfigLoader, ConfigResult, PerchConfig, Profile};
pub use entry::{AppEntry, EntryOptions, HTTPS_ONLY_BODY, UUID_COOKIE};
pub use error::{RuntimeError, RuntimeResult};
pub use hooks::{AppHooks, NoAppHooks};
pub use logging::{LoggingBuilder, SpanEvents};
pub use panic::UNCAUGHT_PANIC_KEY;
pub use report::TracingReporter;
pub use trace::SpanTracer;

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides the commonly used logging macros and `Level`.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}

#[cfg(test)]
mod tests;
