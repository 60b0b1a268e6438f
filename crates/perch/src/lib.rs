//! # Perch
//!
//! A controller/filter web framework with declarative request pipelines.
//!
//! ## Overview
//!
//! Requests are routed by path to `/{controller}/{action}`. Every controller
//! and action carries an ordered set of filters, inherited along the
//! controller chain, that can check, prepare and post-process the request
//! around the action body.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────┐     ┌────────────┐     ┌───────────────────────────────┐
//! │  Transport  │────▶│  Entry   │────▶│ Dispatcher │────▶│ check rules ─▶ pre ─▶ action  │
//! │   (axum)    │     │ (hooks,  │     │            │     │   ─▶ render ─▶ post           │
//! └─────────────┘     │ reports) │     └────────────┘     └───────────────────────────────┘
//!                     └──────────┘
//! ```
//!
//! - **Transport**: decodes HTTP into a `RequestContext` and back
//! - **Entry**: fetch ids, visitor cookie, https check, hooks and reports
//! - **Dispatcher**: controller/action lookup and the filter pipeline
//! - **Actions**: user-defined async functions (Axum-style)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use perch::prelude::*;
//!
//! async fn hello(Args(q): Args<Query>) -> JsonBody {
//!     JsonBody::success(json!({ "hello": q.name }))
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = PerchApp::new();
//!     let index = ControllerDef::builder("index")
//!         .extends(app.base_controller())
//!         .filter(app.builtins().http_method.with(Method::GET))
//!         .action("hello", hello)
//!         .build()?;
//!
//!     app.controller(index).run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output
//! - `templates`: minijinja view rendering (default)

pub use perch_core as core;
pub use perch_framework as framework;
pub use perch_runtime as runtime;
pub use perch_transport as transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use perch::prelude::*;
/// ```
pub mod prelude {
    // Application - main entry point
    pub use perch_runtime::{AppHooks, PerchApp, PerchConfig, ReadyApp};

    // Controllers and filters
    pub use perch_framework::{
        ActionDef, BuiltinFilters, ControllerDef, FilterDef, FilterProps, define_filter,
    };

    // Extractors - for action parameters
    pub use perch_framework::{ActionArgs, ActionScope, Args, RouteNames};

    // Results and errors
    pub use perch_core::{
        ActionResult, ContentDisposition, DispatchError, DispatchResult, JsonBody, JsonCode,
        RequestContext, SendOptions, StatusError,
    };
    pub use perch_core::http::{Method, StatusCode};

    // Coordination of competing async work
    pub use perch_core::{AsyncCoordinator, GroupKey, RunAction, RunOptions};
}
