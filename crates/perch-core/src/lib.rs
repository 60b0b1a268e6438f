//! # Perch Core
//!
//! Leaf types shared by every Perch crate:
//!
//! - **Errors**: the registration-time [`StructuralError`] and the
//!   request-time [`DispatchError`] taxonomy.
//! - **Request context**: [`RequestContext`], the transport-facing object
//!   passed through every filter hook and action.
//! - **Results**: [`ActionResult`], the tagged union an action returns, and
//!   the [`JsonBody`] envelope.
//! - **Capabilities**: collaborator traits for view rendering, file delivery,
//!   reporting and request tracing.
//! - **Coordination**: [`AsyncCoordinator`], which arbitrates competing
//!   asynchronous operations sharing a [`GroupKey`].

pub mod capability;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod report;
pub mod result;

pub use capability::{
    BoxedFileSender, BoxedRenderer, BoxedTracer, FileSender, RequestTracer, TraceSpan,
    ViewRenderer,
};
pub use context::{
    RequestContext, RequestContextBuilder, ResponseBody, ResponseParts, SetCookie, Stamp,
};
pub use coordinator::{
    AsyncCoordinator, GroupKey, NoHooks, RunAction, RunError, RunHooks, RunInfo, RunOptions,
    RunStatus,
};
pub use error::{BoxError, DispatchError, DispatchResult, StatusError, StructuralError};
pub use report::{LogOptions, NullReporter, ReportEvent, ReportKind, ReportLevel, Reporter};
pub use result::{
    ActionResult, ActionReturn, ContentDisposition, IntoActionReturn, JsonBody, JsonCode,
    ReturnError, SendOptions,
};

// Re-exported so downstream crates agree on one `http` version.
pub use http;
