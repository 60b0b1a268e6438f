//! Action handlers.
//!
//! An action is an async function whose parameters are extracted from the
//! per-request [`ActionScope`], similar to axum handlers:
//!
//! ```rust,ignore
//! use perch_framework::action::{ActionScope, Args};
//!
//! #[derive(Deserialize)]
//! struct Lookup {
//!     id: u64,
//! }
//!
//! async fn get_info(Args(lookup): Args<Lookup>) -> DispatchResult<ActionResult> {
//!     ActionResult::json(json!({ "id": lookup.id }))
//! }
//!
//! async fn whoami(scope: ActionScope) -> ActionResult {
//!     ActionResult::xml(format!("<path>{}</path>", scope.ctx().path()))
//! }
//! ```
//!
//! Anything implementing [`IntoActionReturn`] may be returned; returning
//! nothing (`()` or `None`) fails the request at render time.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use perch_core::http::StatusCode;
use perch_core::{
    ActionReturn, DispatchError, DispatchResult, IntoActionReturn, RequestContext,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::filter::RouteNames;

// =============================================================================
// Arguments
// =============================================================================

/// The merged request arguments of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionArgs(Map<String, Value>);

impl ActionArgs {
    /// Merges query, body and the embedded form payload.
    ///
    /// Later sources win: form payload > body > query. The form payload is
    /// the JSON text found under `form_key` in the body; it is ignored when
    /// it does not parse to an object.
    pub fn merge(query: &Map<String, Value>, body: &Value, form_key: &str) -> Self {
        let mut args = query.clone();
        if let Value::Object(fields) = body {
            args.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));

            let form = fields
                .get(form_key)
                .and_then(Value::as_str)
                .and_then(|raw| serde_json::from_str::<Map<String, Value>>(raw).ok());
            if let Some(form) = form {
                args.extend(form);
            }
        }
        Self(args)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Deserializes all arguments into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> DispatchResult<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| DispatchError::status_msg(StatusCode::BAD_REQUEST, e.to_string()))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for ActionArgs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// =============================================================================
// Scope
// =============================================================================

/// A fresh per-request view of the controller an action belongs to.
#[derive(Debug, Clone)]
pub struct ActionScope {
    ctx: Arc<RequestContext>,
    route: RouteNames,
    args: Arc<ActionArgs>,
    defaults: Arc<Value>,
}

impl ActionScope {
    pub fn new(
        ctx: Arc<RequestContext>,
        route: RouteNames,
        args: ActionArgs,
        defaults: Arc<Value>,
    ) -> Self {
        Self {
            ctx,
            route,
            args: Arc::new(args),
            defaults,
        }
    }

    pub fn ctx(&self) -> &Arc<RequestContext> {
        &self.ctx
    }

    pub fn route(&self) -> &RouteNames {
        &self.route
    }

    pub fn args(&self) -> &ActionArgs {
        &self.args
    }

    /// The application's controller default configuration.
    pub fn default_config(&self) -> &Value {
        &self.defaults
    }
}

// =============================================================================
// Extraction
// =============================================================================

/// Types that can be pulled out of an [`ActionScope`] as action parameters.
pub trait FromActionScope: Sized + Send {
    fn from_scope(scope: &ActionScope) -> DispatchResult<Self>;
}

impl FromActionScope for ActionScope {
    fn from_scope(scope: &ActionScope) -> DispatchResult<Self> {
        Ok(scope.clone())
    }
}

impl FromActionScope for ActionArgs {
    fn from_scope(scope: &ActionScope) -> DispatchResult<Self> {
        Ok(ActionArgs::clone(&scope.args))
    }
}

impl FromActionScope for Arc<RequestContext> {
    fn from_scope(scope: &ActionScope) -> DispatchResult<Self> {
        Ok(Arc::clone(&scope.ctx))
    }
}

impl FromActionScope for RouteNames {
    fn from_scope(scope: &ActionScope) -> DispatchResult<Self> {
        Ok(scope.route.clone())
    }
}

/// The merged arguments deserialized into `T`; a mismatch is a 400.
#[derive(Debug, Clone)]
pub struct Args<T>(pub T);

impl<T: DeserializeOwned + Send> FromActionScope for Args<T> {
    fn from_scope(scope: &ActionScope) -> DispatchResult<Self> {
        scope.args.parse().map(Args)
    }
}

// =============================================================================
// Action trait
// =============================================================================

/// Implemented for async functions usable as actions.
pub trait Action<T>: Clone + Send + Sync + 'static {
    fn call(self, scope: ActionScope) -> BoxFuture<'static, DispatchResult<ActionReturn>>;
}

/// A type-erased action.
pub type BoxedAction =
    Arc<dyn Fn(ActionScope) -> BoxFuture<'static, DispatchResult<ActionReturn>> + Send + Sync>;

/// Erases an action's type.
pub fn into_action<F, T>(f: F) -> BoxedAction
where
    F: Action<T>,
    T: 'static,
{
    Arc::new(move |scope: ActionScope| f.clone().call(scope))
}

macro_rules! impl_action {
    ($($ty:ident),*) => {
        #[allow(non_snake_case, unused_variables)]
        impl<F, Fut, Res, $($ty,)*> Action<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: IntoActionReturn,
            $( $ty: FromActionScope + 'static, )*
        {
            fn call(self, scope: ActionScope) -> BoxFuture<'static, DispatchResult<ActionReturn>> {
                Box::pin(async move {
                    $(
                        let $ty = $ty::from_scope(&scope)?;
                    )*
                    (self)($($ty,)*).await.into_action_return()
                })
            }
        }
    };
}

impl_action!();
impl_action!(T1);
impl_action!(T1, T2);
impl_action!(T1, T2, T3);
impl_action!(T1, T2, T3, T4);
