//! Filter definitions.
//!
//! A [`Filter`] is a named, orderable unit of cross-cutting behaviour with up
//! to three hooks:
//!
//! - **check rule**: runs first, may reject the request;
//! - **pre execute**: runs before the action body;
//! - **post execute**: runs after the action body.
//!
//! [`define_filter`] pairs a filter with an option-application function and
//! returns a [`FilterDef`]. Each call to [`FilterDef::with`] produces a fresh
//! [`FilterAttachment`] but the underlying filter, and therefore its identity
//! for duplicate detection, stays the same.
//!
//! # Example
//!
//! ```rust,ignore
//! use perch_framework::filter::{FilterProps, define_filter};
//!
//! let login_required = define_filter(
//!     "login_required",
//!     |state, redirect: &'static str| {
//!         state.rules.set_value("login_redirect", redirect.into());
//!     },
//!     FilterProps::new().default_order(100).on_check_rule(|target, _names, ctx| async move {
//!         if ctx.cookie("session").is_none() {
//!             return Err(StatusError::new(StatusCode::UNAUTHORIZED).into());
//!         }
//!         Ok(())
//!     }),
//! );
//!
//! let admin = ControllerDef::builder("Admin")
//!     .extends(&base)
//!     .filter(login_required.with("/login"))
//!     .build()?;
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use perch_core::{DispatchResult, RequestContext};

use crate::filter_set::{FilterInfo, FilterRules, FilterSet, FilterState};

// =============================================================================
// Targets
// =============================================================================

/// Whether a filter set belongs to a controller or an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Controller,
    Action,
}

/// A registered controller or action, as seen by filter hooks.
#[derive(Clone)]
pub struct FilterTarget {
    kind: TargetKind,
    name: String,
    filters: FilterSet,
}

impl FilterTarget {
    pub(crate) fn new(kind: TargetKind, name: impl Into<String>, filters: FilterSet) -> Self {
        Self {
            kind,
            name: name.into(),
            filters,
        }
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    /// The merged rules of this target.
    pub fn rules(&self) -> &FilterRules {
        self.filters.rules()
    }

    pub fn info(&self) -> &FilterInfo {
        self.filters.info()
    }
}

impl std::fmt::Debug for FilterTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterTarget")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("filters", &self.filters.len())
            .finish()
    }
}

/// The route names a request resolved to, lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteNames {
    pub controller: String,
    pub action: String,
}

// =============================================================================
// Hooks
// =============================================================================

/// Type-erased rule-check hook.
pub type CheckRuleHook = Arc<
    dyn Fn(Arc<FilterTarget>, RouteNames, Arc<RequestContext>) -> BoxFuture<'static, DispatchResult<()>>
        + Send
        + Sync,
>;

/// Type-erased pre/post execute hook.
pub type ExecuteHook = Arc<
    dyn Fn(Arc<FilterTarget>, Arc<RequestContext>) -> BoxFuture<'static, DispatchResult<()>>
        + Send
        + Sync,
>;

/// Optional properties of a filter.
#[derive(Clone, Default)]
pub struct FilterProps {
    default_order: i64,
    description: Option<String>,
    on_check_rule: Option<CheckRuleHook>,
    pre_execute: Option<ExecuteHook>,
    post_execute: Option<ExecuteHook>,
}

impl FilterProps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Order used when an attachment does not give one. Higher runs first.
    pub fn default_order(mut self, order: i64) -> Self {
        self.default_order = order;
        self
    }

    /// Free-text description of the filter.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn on_check_rule<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<FilterTarget>, RouteNames, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        self.on_check_rule = Some(Arc::new(
            move |target, names, ctx| -> BoxFuture<'static, DispatchResult<()>> {
                Box::pin(f(target, names, ctx))
            },
        ));
        self
    }

    pub fn pre_execute<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<FilterTarget>, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        self.pre_execute = Some(Arc::new(
            move |target, ctx| -> BoxFuture<'static, DispatchResult<()>> { Box::pin(f(target, ctx)) },
        ));
        self
    }

    pub fn post_execute<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<FilterTarget>, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        self.post_execute = Some(Arc::new(
            move |target, ctx| -> BoxFuture<'static, DispatchResult<()>> { Box::pin(f(target, ctx)) },
        ));
        self
    }
}

// =============================================================================
// Filter
// =============================================================================

struct FilterInner {
    name: String,
    props: FilterProps,
}

/// A shared, immutable filter. Equality is identity.
#[derive(Clone)]
pub struct Filter {
    inner: Arc<FilterInner>,
}

impl Filter {
    pub fn new(name: impl Into<String>, props: FilterProps) -> Self {
        Self {
            inner: Arc::new(FilterInner {
                name: name.into(),
                props,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn default_order(&self) -> i64 {
        self.inner.props.default_order
    }

    pub fn description(&self) -> Option<&str> {
        self.inner.props.description.as_deref()
    }

    pub fn has_check_rule(&self) -> bool {
        self.inner.props.on_check_rule.is_some()
    }

    /// Runs the rule-check hook, if any.
    pub async fn check_rule(
        &self,
        target: &Arc<FilterTarget>,
        names: &RouteNames,
        ctx: &Arc<RequestContext>,
    ) -> DispatchResult<()> {
        match &self.inner.props.on_check_rule {
            Some(hook) => hook(Arc::clone(target), names.clone(), Arc::clone(ctx)).await,
            None => Ok(()),
        }
    }

    /// Runs the pre-execute hook, if any.
    pub async fn pre_execute(
        &self,
        target: &Arc<FilterTarget>,
        ctx: &Arc<RequestContext>,
    ) -> DispatchResult<()> {
        match &self.inner.props.pre_execute {
            Some(hook) => hook(Arc::clone(target), Arc::clone(ctx)).await,
            None => Ok(()),
        }
    }

    /// Runs the post-execute hook, if any.
    pub async fn post_execute(
        &self,
        target: &Arc<FilterTarget>,
        ctx: &Arc<RequestContext>,
    ) -> DispatchResult<()> {
        match &self.inner.props.post_execute {
            Some(hook) => hook(Arc::clone(target), Arc::clone(ctx)).await,
            None => Ok(()),
        }
    }
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Filter {}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("name", &self.inner.name)
            .field("default_order", &self.inner.props.default_order)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Definitions and attachments
// =============================================================================

type ApplyFn<O> = Arc<dyn Fn(&mut FilterState, O) + Send + Sync>;

/// A filter paired with the function that applies its options to a target.
pub struct FilterDef<O> {
    filter: Filter,
    apply: ApplyFn<O>,
}

impl<O> Clone for FilterDef<O> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            apply: Arc::clone(&self.apply),
        }
    }
}

impl<O> std::fmt::Debug for FilterDef<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FilterDef").field(&self.filter).finish()
    }
}

impl<O: Send + 'static> FilterDef<O> {
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Attaches with the filter's default order.
    pub fn with(&self, option: impl Into<O>) -> FilterAttachment {
        self.with_order(option, self.filter.default_order())
    }

    /// Attaches with an explicit order.
    pub fn with_order(&self, option: impl Into<O>, order: i64) -> FilterAttachment {
        let option = option.into();
        let apply = Arc::clone(&self.apply);
        FilterAttachment {
            filter: self.filter.clone(),
            order,
            apply: Box::new(move |state| apply(state, option)),
        }
    }
}

/// One pending attachment of a filter to a controller or action.
pub struct FilterAttachment {
    filter: Filter,
    order: i64,
    apply: Box<dyn FnOnce(&mut FilterState) + Send>,
}

impl FilterAttachment {
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn order(&self) -> i64 {
        self.order
    }

    pub(crate) fn into_parts(self) -> (Filter, i64, Box<dyn FnOnce(&mut FilterState) + Send>) {
        (self.filter, self.order, self.apply)
    }
}

impl std::fmt::Debug for FilterAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterAttachment")
            .field("filter", &self.filter)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// Defines a filter.
///
/// `apply` receives the target's mutable filter state and the option given
/// at attachment time.
pub fn define_filter<O, F>(name: impl Into<String>, apply: F, props: FilterProps) -> FilterDef<O>
where
    F: Fn(&mut FilterState, O) + Send + Sync + 'static,
{
    FilterDef {
        filter: Filter::new(name, props),
        apply: Arc::new(apply),
    }
}
