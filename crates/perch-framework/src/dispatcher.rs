//! The per-request dispatch pipeline.
//!
//! [`Dispatcher::dispatch`] drives one request through
//!
//! ```text
//! Resolving -> RuleChecking -> PreExecuting -> Invoking -> PostExecuting -> Rendering
//! ```
//!
//! Every hook and the action body are awaited one after another; the first
//! error aborts the pipeline and is returned unchanged to the caller, which
//! owns error classification.
//!
//! Traversal order of filters inside a target is always by descending order
//! bucket, attachment order within a bucket. Targets are visited as
//!
//! | stage        | order                  |
//! |--------------|------------------------|
//! | rule check   | controller, action     |
//! | pre execute  | controller, action     |
//! | post execute | action, controller     |
//!
//! During rule checking a controller filter is skipped when the same filter
//! is attached to the action itself; the action's own check covers it.

use std::sync::Arc;

use perch_core::{DispatchError, DispatchResult, ReturnError, RequestContext};
use serde_json::Value;
use tracing::{Instrument, Level, debug, span};

use crate::action::{ActionArgs, ActionScope};
use crate::filter::{FilterTarget, RouteNames};
use crate::registry::{ControllerRegistry, RegisteredAction, RegisteredController};
use crate::response::Responder;

/// Message of the 500 raised for an empty or unrecognised action return.
pub const ROUTER_RETURN_ERROR: &str = "Router Return Error";

/// Routing options of a [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Controller used when the path has no controller segment.
    pub default_controller: String,
    /// Action used when the path has no action segment.
    pub default_action: String,
    /// Body field holding an embedded JSON form payload.
    pub form_request_key: String,
    /// Handed to every [`ActionScope`].
    pub controller_defaults: Arc<Value>,
    /// Record pipeline stamps on the request context.
    pub timestamps: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            default_controller: "index".to_string(),
            default_action: "index".to_string(),
            form_request_key: "formRequest".to_string(),
            controller_defaults: Arc::new(Value::Null),
            timestamps: true,
        }
    }
}

/// The `:controller?/:action?` segments of a request path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams {
    pub controller: Option<String>,
    pub action: Option<String>,
}

impl RouteParams {
    /// Parses `{prefix}/:controller?/:action?/:value*`.
    ///
    /// Returns `None` for paths outside `prefix`. Segments are
    /// percent-decoded; anything after the action segment is ignored.
    pub fn parse(path: &str, prefix: &str) -> Option<Self> {
        let prefix = prefix.trim_end_matches('/');
        let rest = path.strip_prefix(prefix)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }

        let mut segments = rest.split('/').filter(|s| !s.is_empty()).map(|s| {
            urlencoding::decode(s)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| s.to_string())
        });
        Some(Self {
            controller: segments.next(),
            action: segments.next(),
        })
    }

    /// Parses a path with no prefix.
    pub fn from_path(path: &str) -> Self {
        Self::parse(path, "").unwrap_or_default()
    }
}

/// Stages of the pipeline, used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Resolving,
    RuleChecking,
    PreExecuting,
    Invoking,
    PostExecuting,
    Rendering,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Resolving => "resolving",
            Self::RuleChecking => "rule_checking",
            Self::PreExecuting => "pre_executing",
            Self::Invoking => "invoking",
            Self::PostExecuting => "post_executing",
            Self::Rendering => "rendering",
        })
    }
}

/// What happened to a dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A controller action answered the request.
    Handled,
    /// No controller or action matched; the caller should fall through.
    NotMatched,
}

#[derive(Clone, Copy)]
enum Phase {
    Pre,
    Post,
}

/// Routes requests to registered actions.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ControllerRegistry>,
    responder: Responder,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(registry: ControllerRegistry, responder: Responder, options: DispatchOptions) -> Self {
        Self {
            registry: Arc::new(registry),
            responder,
            options,
        }
    }

    pub fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Runs the pipeline for one request.
    ///
    /// Returns [`DispatchOutcome::NotMatched`] without touching the response
    /// when the route does not resolve to a registered action.
    pub async fn dispatch(
        &self,
        route: &RouteParams,
        ctx: &Arc<RequestContext>,
    ) -> DispatchResult<DispatchOutcome> {
        let controller_name = route
            .controller
            .as_deref()
            .unwrap_or(&self.options.default_controller);
        let action_name = route
            .action
            .as_deref()
            .unwrap_or(&self.options.default_action);

        let Some((controller, action)) = self.resolve(controller_name, action_name) else {
            debug!(
                controller = %controller_name,
                action = %action_name,
                stage = %PipelineStage::Resolving,
                "No matching action"
            );
            return Ok(DispatchOutcome::NotMatched);
        };

        let names = RouteNames {
            controller: controller_name.to_lowercase(),
            action: action_name.to_lowercase(),
        };
        let span = span!(
            Level::DEBUG,
            "dispatch",
            controller = %names.controller,
            action = %names.action
        );
        self.run(controller, action, names, ctx)
            .instrument(span)
            .await
            .map(|()| DispatchOutcome::Handled)
    }

    fn resolve(
        &self,
        controller: &str,
        action: &str,
    ) -> Option<(&RegisteredController, &RegisteredAction)> {
        let controller = self.registry.controller(controller)?;
        let action = controller.action(action)?;
        Some((controller, action))
    }

    async fn run(
        &self,
        controller: &RegisteredController,
        action: &RegisteredAction,
        names: RouteNames,
        ctx: &Arc<RequestContext>,
    ) -> DispatchResult<()> {
        let stage_failed = |stage: PipelineStage| {
            move |e: &DispatchError| {
                if !e.is_superseded() {
                    debug!(stage = %stage, error = %e, "Dispatch stage failed");
                }
            }
        };

        self.stamp(ctx, || "checkRules_begin".to_string());
        self.check_rules(controller, action, &names, ctx)
            .await
            .inspect_err(stage_failed(PipelineStage::RuleChecking))?;
        self.stamp(ctx, || "checkRules_end".to_string());

        execute([controller.target(), action.target()], ctx, Phase::Pre)
            .await
            .inspect_err(stage_failed(PipelineStage::PreExecuting))?;

        self.stamp(ctx, || format!("{}_{}_begin", names.controller, names.action));
        let args = ActionArgs::merge(ctx.query(), ctx.body(), &self.options.form_request_key);
        let scope = ActionScope::new(
            Arc::clone(ctx),
            names.clone(),
            args,
            Arc::clone(&self.options.controller_defaults),
        );
        let ret = (action.handler())(scope)
            .await
            .inspect_err(stage_failed(PipelineStage::Invoking))?;
        self.stamp(ctx, || format!("{}_{}_end", names.controller, names.action));

        execute([action.target(), controller.target()], ctx, Phase::Post)
            .await
            .inspect_err(stage_failed(PipelineStage::PostExecuting))?;

        let result = ret.into_result().map_err(|e| {
            let key = format!("router_{}_{}", names.controller, names.action);
            match e {
                ReturnError::Empty => DispatchError::server_keyed(
                    ROUTER_RETURN_ERROR,
                    format!("{key}_actionReturn_null"),
                ),
                ReturnError::UnknownTag(source) => DispatchError::server_from(
                    ROUTER_RETURN_ERROR,
                    format!("{key}_actionReturn_typeError"),
                    source,
                ),
            }
        })
        .inspect_err(stage_failed(PipelineStage::Rendering))?;
        self.responder
            .respond(ctx, result)
            .await
            .inspect_err(stage_failed(PipelineStage::Rendering))
    }

    /// Controller filters first, then action filters, each by descending
    /// order. Controller filters also attached to the action are skipped.
    async fn check_rules(
        &self,
        controller: &RegisteredController,
        action: &RegisteredAction,
        names: &RouteNames,
        ctx: &Arc<RequestContext>,
    ) -> DispatchResult<()> {
        let own = action.target().filters();
        for filter in controller.target().filters().iter_descending() {
            if own.contains(filter) || !filter.has_check_rule() {
                continue;
            }
            let label = |edge: &str| {
                format!(
                    "C_/{}/{}_{}_{edge}",
                    controller.name(),
                    action.name(),
                    filter.name()
                )
            };
            self.stamp(ctx, || label("begin"));
            filter.check_rule(controller.target(), names, ctx).await?;
            self.stamp(ctx, || label("end"));
        }

        for filter in own.iter_descending() {
            if !filter.has_check_rule() {
                continue;
            }
            let label = |edge: &str| {
                format!(
                    "A_/{}/{}_{}_{edge}",
                    controller.name(),
                    action.name(),
                    filter.name()
                )
            };
            self.stamp(ctx, || label("begin"));
            filter.check_rule(action.target(), names, ctx).await?;
            self.stamp(ctx, || label("end"));
        }
        Ok(())
    }

    fn stamp(&self, ctx: &RequestContext, label: impl FnOnce() -> String) {
        if self.options.timestamps {
            ctx.add_stamp(label());
        }
    }
}

/// Runs the pre or post hooks of each target in turn.
async fn execute(
    targets: [&Arc<FilterTarget>; 2],
    ctx: &Arc<RequestContext>,
    phase: Phase,
) -> DispatchResult<()> {
    for target in targets {
        for filter in target.filters().iter_descending() {
            match phase {
                Phase::Pre => filter.pre_execute(target, ctx).await?,
                Phase::Post => filter.post_execute(target, ctx).await?,
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use perch_core::http::{Method, StatusCode};
    use perch_core::{ActionResult, ActionReturn, JsonBody, ResponseBody};
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::action::Args;
    use crate::builtin::BuiltinFilters;
    use crate::controller::{ActionDef, ControllerDef};
    use crate::filter::{FilterDef, FilterProps, define_filter};

    type Log = Arc<Mutex<Vec<String>>>;

    /// A filter that records every hook invocation as `{name}:{hook}:{target}`.
    fn recording(name: &'static str, log: &Log) -> FilterDef<()> {
        let (check, pre, post) = (log.clone(), log.clone(), log.clone());
        define_filter(
            name,
            |_s, _o: ()| {},
            FilterProps::new()
                .on_check_rule(move |target, _names, _ctx| {
                    check.lock().push(format!("{name}:check:{}", target.name()));
                    async { Ok(()) }
                })
                .pre_execute(move |target, _ctx| {
                    pre.lock().push(format!("{name}:pre:{}", target.name()));
                    async { Ok(()) }
                })
                .post_execute(move |target, _ctx| {
                    post.lock().push(format!("{name}:post:{}", target.name()));
                    async { Ok(()) }
                }),
        )
    }

    async fn index() -> DispatchResult<ActionResult> {
        ActionResult::json(json!({ "id": 1 }))
    }

    async fn empty() {}

    async fn tagged() -> Value {
        json!({ "type": "yaml", "result": {} })
    }

    #[derive(Deserialize)]
    struct Echo {
        name: String,
    }

    async fn echo(Args(echo): Args<Echo>) -> JsonBody {
        JsonBody::success(json!({ "name": echo.name }))
    }

    fn request(method: Method, path: &str) -> Arc<RequestContext> {
        Arc::new(RequestContext::builder(method, path).fetch_id("req-1").build())
    }

    fn dispatcher(base: &Arc<ControllerDef>, controllers: Vec<Arc<ControllerDef>>) -> Dispatcher {
        let registry = ControllerRegistry::register(base, controllers, []).unwrap();
        Dispatcher::new(registry, Responder::new("1.0.0"), DispatchOptions::default())
    }

    async fn dispatch(dispatcher: &Dispatcher, ctx: &Arc<RequestContext>) -> DispatchResult<DispatchOutcome> {
        dispatcher
            .dispatch(&RouteParams::from_path(ctx.path()), ctx)
            .await
    }

    #[test]
    fn route_params_respect_prefix() {
        assert_eq!(
            RouteParams::parse("/api/User/getInfo/7/x", "/api"),
            Some(RouteParams {
                controller: Some("User".into()),
                action: Some("getInfo".into()),
            })
        );
        assert_eq!(RouteParams::parse("/api", "/api/"), Some(RouteParams::default()));
        assert_eq!(RouteParams::parse("/apix/user", "/api"), None);
        assert_eq!(
            RouteParams::from_path("/na%20me").controller.as_deref(),
            Some("na me")
        );
    }

    #[tokio::test]
    async fn hooks_run_in_stage_order() {
        let log: Log = Arc::default();
        let low = recording("low", &log);
        let high = recording("high", &log);
        let own = recording("own", &log);

        let base = ControllerDef::base();
        let parent = ControllerDef::builder("Parent")
            .extends(&base)
            .filter(low.with_order((), 1))
            .build()
            .unwrap();
        let user = ControllerDef::builder("User")
            .extends(&parent)
            .filter(high.with_order((), 2))
            .action_with(ActionDef::builder("index", index).filter(own.with(())))
            .build()
            .unwrap();

        let dispatcher = dispatcher(&base, vec![user]);
        let ctx = request(Method::GET, "/user");
        assert_eq!(dispatch(&dispatcher, &ctx).await.unwrap(), DispatchOutcome::Handled);

        assert_eq!(
            *log.lock(),
            vec![
                "high:check:User",
                "low:check:User",
                "own:check:index",
                "high:pre:User",
                "low:pre:User",
                "own:pre:index",
                "own:post:index",
                "high:post:User",
                "low:post:User",
            ]
        );
    }

    #[tokio::test]
    async fn controller_filter_on_action_is_checked_once() {
        let log: Log = Arc::default();
        let shared = recording("shared", &log);

        let base = ControllerDef::base();
        let user = ControllerDef::builder("User")
            .extends(&base)
            .filter(shared.with(()))
            .action_with(ActionDef::builder("index", index).filter(shared.with(())))
            .build()
            .unwrap();

        let dispatcher = dispatcher(&base, vec![user]);
        dispatch(&dispatcher, &request(Method::GET, "/user/index"))
            .await
            .unwrap();

        let log = log.lock();
        let checks: Vec<_> = log.iter().filter(|l| l.contains(":check:")).collect();
        assert_eq!(checks, vec!["shared:check:index"]);
        let pres: Vec<_> = log.iter().filter(|l| l.contains(":pre:")).collect();
        assert_eq!(pres, vec!["shared:pre:User", "shared:pre:index"]);
    }

    #[tokio::test]
    async fn controller_method_filter_rejects_other_methods() {
        let filters = BuiltinFilters::new();
        let base = ControllerDef::base();
        let user = ControllerDef::builder("User")
            .extends(&base)
            .filter(filters.http_method.with(Method::GET))
            .action("index", index)
            .build()
            .unwrap();
        let dispatcher = dispatcher(&base, vec![user]);

        let get = request(Method::GET, "/user/index");
        assert_eq!(dispatch(&dispatcher, &get).await.unwrap(), DispatchOutcome::Handled);
        assert_eq!(get.status(), StatusCode::OK);

        let post = request(Method::POST, "/user/index");
        let err = dispatch(&dispatcher, &post).await.unwrap_err();
        assert_eq!(err.http_status(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn failing_check_stops_before_pre_execute() {
        let log: Log = Arc::default();
        let audit = recording("audit", &log);
        let deny = define_filter(
            "deny",
            |_s, _o: ()| {},
            FilterProps::new().on_check_rule(|_t, _n, _c| async {
                Err(DispatchError::status(StatusCode::UNAUTHORIZED))
            }),
        );

        let base = ControllerDef::base();
        let user = ControllerDef::builder("User")
            .extends(&base)
            .filter(audit.with_order((), 1))
            .filter(deny.with_order((), 5))
            .action("index", index)
            .build()
            .unwrap();
        let dispatcher = dispatcher(&base, vec![user]);

        let err = dispatch(&dispatcher, &request(Method::GET, "/user"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(StatusCode::UNAUTHORIZED));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn json_result_renders_the_envelope() {
        let base = ControllerDef::base();
        let index_ctrl = ControllerDef::builder("Index")
            .extends(&base)
            .action("index", index)
            .build()
            .unwrap();
        let dispatcher = dispatcher(&base, vec![index_ctrl]);

        let ctx = request(Method::GET, "/");
        dispatch(&dispatcher, &ctx).await.unwrap();

        let response = ctx.response();
        assert_eq!(response.effective_status(), StatusCode::OK);
        assert_eq!(
            response.body,
            ResponseBody::Json(json!({
                "code": 0,
                "data": { "id": 1 },
                "version": "1.0.0",
                "msg": "",
                "fetchId": "req-1",
            }))
        );
    }

    #[tokio::test]
    async fn empty_return_is_a_router_return_error() {
        let log: Log = Arc::default();
        let audit = recording("audit", &log);
        let base = ControllerDef::base();
        let user = ControllerDef::builder("User")
            .extends(&base)
            .filter(audit.with(()))
            .action("empty", empty)
            .build()
            .unwrap();
        let dispatcher = dispatcher(&base, vec![user]);

        let err = dispatch(&dispatcher, &request(Method::GET, "/user/empty"))
            .await
            .unwrap_err();
        match err {
            DispatchError::Server { msg, log: options, .. } => {
                assert_eq!(msg, ROUTER_RETURN_ERROR);
                assert_eq!(options.key.as_deref(), Some("router_user_empty_actionReturn_null"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(log.lock().contains(&"audit:post:User".to_string()));
    }

    #[tokio::test]
    async fn unknown_tag_is_a_router_return_error() {
        let base = ControllerDef::base();
        let user = ControllerDef::builder("User")
            .extends(&base)
            .action("tagged", tagged)
            .build()
            .unwrap();
        let dispatcher = dispatcher(&base, vec![user]);

        let err = dispatch(&dispatcher, &request(Method::GET, "/user/tagged"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(
            err.log_options().and_then(|l| l.key.as_deref()),
            Some("router_user_tagged_actionReturn_typeError")
        );
    }

    #[tokio::test]
    async fn unmatched_routes_fall_through() {
        let base = ControllerDef::base();
        let user = ControllerDef::builder("User")
            .extends(&base)
            .action("index", index)
            .build()
            .unwrap();
        let dispatcher = dispatcher(&base, vec![user]);

        for path in ["/nobody", "/user/missing"] {
            let ctx = request(Method::GET, path);
            assert_eq!(
                dispatch(&dispatcher, &ctx).await.unwrap(),
                DispatchOutcome::NotMatched
            );
            assert!(ctx.response().body.is_empty());
        }
    }

    #[tokio::test]
    async fn arguments_merge_query_body_and_form() {
        let base = ControllerDef::base();
        let user = ControllerDef::builder("User")
            .extends(&base)
            .action("echo", echo)
            .build()
            .unwrap();
        let dispatcher = dispatcher(&base, vec![user]);

        let ctx = Arc::new(
            RequestContext::builder(Method::POST, "/User/Echo")
                .query("name", "query")
                .body(json!({ "name": "body", "formRequest": "{\"name\":\"form\"}" }))
                .build(),
        );
        dispatch(&dispatcher, &ctx).await.unwrap();
        match ctx.response().body {
            ResponseBody::Json(body) => assert_eq!(body["data"]["name"], "form"),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stamps_follow_the_pipeline() {
        let base = ControllerDef::base();
        let user = ControllerDef::builder("User")
            .extends(&base)
            .action("index", index)
            .build()
            .unwrap();
        let dispatcher = dispatcher(&base, vec![user]);

        let ctx = request(Method::GET, "/user");
        dispatch(&dispatcher, &ctx).await.unwrap();
        let labels: Vec<_> = ctx.stamps().into_iter().map(|s| s.label).collect();
        assert_eq!(
            labels,
            vec!["checkRules_begin", "checkRules_end", "user_index_begin", "user_index_end"]
        );
    }

    #[tokio::test]
    async fn raw_tagged_values_render() {
        async fn raw() -> ActionReturn {
            ActionReturn::Tagged(json!({ "type": "xml", "result": { "xmlStr": "<a/>" } }))
        }

        let base = ControllerDef::base();
        let feed = ControllerDef::builder("Feed")
            .extends(&base)
            .action("index", raw)
            .build()
            .unwrap();
        let dispatcher = dispatcher(&base, vec![feed]);

        let ctx = request(Method::GET, "/feed");
        dispatch(&dispatcher, &ctx).await.unwrap();
        assert_eq!(ctx.response().body, ResponseBody::Text("<a/>".into()));
    }
}
