//! # Perch Framework
//!
//! The request-dispatch and filter-chain engine.
//!
//! This layer provides:
//! - Filters: named, orderable units with rule-check, pre and post hooks
//! - Filter sets with order buckets and merged rules per controller/action
//! - Controller declarations with explicit inheritance
//! - The controller registry, which materialises inherited filters once
//! - Axum-style action handlers with parameter extraction
//! - The dispatch pipeline and the response helper

pub mod action;
pub mod builtin;
pub mod controller;
pub mod dispatcher;
pub mod filter;
pub mod filter_set;
pub mod registry;
pub mod response;

pub use action::{Action, ActionArgs, ActionScope, Args, BoxedAction, FromActionScope, into_action};
pub use builtin::{
    BuiltinFilters, Description, HTTP_METHOD_FILTER_ORDER, HttpMethods, description_filter,
    http_method_filter,
};
pub use controller::{ActionBuilder, ActionDef, ControllerBuilder, ControllerDef};
pub use dispatcher::{
    DispatchOptions, DispatchOutcome, Dispatcher, PipelineStage, ROUTER_RETURN_ERROR, RouteParams,
};
pub use filter::{
    Filter, FilterAttachment, FilterDef, FilterProps, FilterTarget, RouteNames, TargetKind,
    define_filter,
};
pub use filter_set::{FilterInfo, FilterRules, FilterSet, FilterState};
pub use registry::{ControllerRegistry, RegisteredAction, RegisteredController};
pub use response::{Responder, SERVER_ERROR_BODY};
