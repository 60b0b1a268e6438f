//! Per-request entry handling.
//!
//! [`AppEntry`] wraps the [`Dispatcher`] with everything that happens around
//! a dispatch:
//!
//! 1. a fresh `fetchId`, an optional trace span and the begin report
//! 2. the long-lived `uuid` visitor cookie
//! 3. the https-only check
//! 4. `on_request_begin`, dispatch (falling back to 404), `on_request_end`
//! 5. `on_request_error` plus the default error handler on failure
//! 6. the end report with stamps and total timespan
//!
//! A panic escaping steps 3 to 5 is caught and answered as an app error.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use perch_core::http::StatusCode;
use perch_core::{
    BoxedTracer, DispatchError, DispatchResult, LogOptions, ReportEvent, ReportKind, ReportLevel,
    Reporter, RequestContext, SetCookie, StatusError, TraceSpan,
};
use perch_framework::{DispatchOutcome, Dispatcher, RouteParams, SERVER_ERROR_BODY};
use perch_transport::RequestHandler;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::config::PerchConfig;
use crate::hooks::AppHooks;

/// Body of the 404 sent to plain-http requests.
pub const HTTPS_ONLY_BODY: &str = "please use https";

/// Visitor cookie set on first contact.
pub const UUID_COOKIE: &str = "uuid";

const UUID_COOKIE_MAX_AGE: Duration = Duration::from_secs(1000 * 24 * 60 * 60);

const DEFAULT_ERROR_KEY: &str = "defaultOnRequestError";

/// Switches of the entry lifecycle.
#[derive(Debug, Clone)]
pub struct EntryOptions {
    /// Route prefix; empty for none.
    pub prefix: String,
    /// Serve plain-http requests.
    pub accept_http: bool,
    /// Emit the begin/end reports.
    pub default_log: bool,
    /// Record `entry_begin`/`entry_end` stamps.
    pub timestamps: bool,
    pub request_error_handler: bool,
    pub app_error_handler: bool,
    /// Lowercase paths that never get a trace span.
    pub tracing_path_ignore: Vec<String>,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            accept_http: false,
            default_log: true,
            timestamps: true,
            request_error_handler: true,
            app_error_handler: true,
            tracing_path_ignore: Vec::new(),
        }
    }
}

impl EntryOptions {
    pub fn from_config(config: &PerchConfig) -> Self {
        Self {
            prefix: config.server.prefix.clone().unwrap_or_default(),
            accept_http: config.server.accepts_http(),
            default_log: !config.app.disable_default_log,
            timestamps: !config.app.disable_default_timestamp,
            request_error_handler: config.errors.request_handler_enabled(),
            app_error_handler: config.errors.app_handler_enabled(),
            tracing_path_ignore: config
                .tracing
                .path_ignore
                .iter()
                .map(|p| p.trim().to_lowercase())
                .collect(),
        }
    }
}

/// The [`RequestHandler`] of a Perch application.
pub struct AppEntry {
    dispatcher: Dispatcher,
    reporter: Arc<dyn Reporter>,
    hooks: Arc<dyn AppHooks>,
    tracer: Option<BoxedTracer>,
    options: EntryOptions,
}

impl AppEntry {
    pub fn new(
        dispatcher: Dispatcher,
        reporter: Arc<dyn Reporter>,
        hooks: Arc<dyn AppHooks>,
        options: EntryOptions,
    ) -> Self {
        Self {
            dispatcher,
            reporter,
            hooks,
            tracer: None,
            options,
        }
    }

    pub fn tracer(mut self, tracer: BoxedTracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    async fn process(&self, ctx: &Arc<RequestContext>) {
        let fetch_id = Uuid::new_v4().to_string();
        ctx.set_fetch_id(fetch_id.clone());

        let mut span = self.start_span(ctx);
        if let Some(span) = span.as_mut() {
            span.log("fetchId", &fetch_id);
        }
        if self.options.default_log {
            self.reporter.report(
                ReportEvent::new(ReportKind::Begin, "request_entry_begin")
                    .fetch_id(fetch_id.clone())
                    .details(json!({ "method": ctx.method().as_str(), "path": ctx.path() })),
            );
        }
        self.stamp(ctx, "entry_begin");

        let uuid = ensure_uuid(ctx);
        if let Some(span) = span.as_mut() {
            span.log("uuid", &uuid);
        }

        if let Err(panic) = AssertUnwindSafe(self.handle_request(ctx)).catch_unwind().await {
            let msg = panic_message(panic.as_ref())
                .unwrap_or_else(|| "request handler panicked".to_string());
            self.handle_panic(ctx, msg).await;
        }

        self.stamp(ctx, "entry_end");
        if self.options.default_log {
            let timespan = u64::try_from(ctx.elapsed().as_millis()).unwrap_or(u64::MAX);
            self.reporter.report(
                ReportEvent::new(ReportKind::End, "request_entry_end")
                    .fetch_id(fetch_id)
                    .details(json!({
                        "tamp": ctx.stamps(),
                        "timespan": timespan,
                        "status": ctx.status().as_u16(),
                    })),
            );
        }
        if let Some(span) = span {
            span.finish();
        }
    }

    async fn handle_request(&self, ctx: &Arc<RequestContext>) {
        let Err(err) = self.run(ctx).await else {
            return;
        };
        self.hooks.on_request_error(&err, ctx).await;
        if self.options.request_error_handler {
            self.handle_error(ctx, err);
        }
    }

    async fn run(&self, ctx: &Arc<RequestContext>) -> DispatchResult<()> {
        if !self.options.accept_http && !ctx.is_https() {
            return Err(StatusError::with_msg(StatusCode::NOT_FOUND, HTTPS_ONLY_BODY)
                .log(LogOptions::keyed("https_only"))
                .into());
        }

        self.hooks.on_request_begin(ctx).await?;

        let route =
            RouteParams::parse(ctx.path(), &self.options.prefix).ok_or_else(StatusError::not_found)?;
        if self.dispatcher.dispatch(&route, ctx).await? == DispatchOutcome::NotMatched {
            return Err(StatusError::not_found().into());
        }

        self.hooks.on_request_end(ctx).await
    }

    /// The default request-error handler: answer, then report.
    pub fn handle_error(&self, ctx: &RequestContext, err: DispatchError) {
        let responder = self.dispatcher.responder();
        let logged = |log: &LogOptions| {
            with_fetch_id(ctx, ReportEvent::log(DEFAULT_ERROR_KEY))
                .msg(DEFAULT_ERROR_KEY)
                .level(ReportLevel::Error)
                .with_options(log)
        };

        match err {
            DispatchError::Superseded => {
                debug!(path = %ctx.path(), "Superseded request unwound");
            }
            DispatchError::Status(status) => {
                responder.status(ctx, status.status, status.msg.as_deref());
                self.reporter.report(logged(&status.log).error(&status));
            }
            DispatchError::Json { body, log } => {
                responder.json(ctx, body);
                self.reporter.report(logged(&log));
            }
            DispatchError::Server { msg, log, source } => {
                responder.status(ctx, StatusCode::INTERNAL_SERVER_ERROR, Some(&msg));
                let mut event = logged(&log);
                if let Some(source) = source {
                    event = event.error(source);
                }
                self.reporter.report(event);
            }
            DispatchError::Unknown(source) => {
                responder.status(
                    ctx,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Some(SERVER_ERROR_BODY),
                );
                self.reporter.report(
                    with_fetch_id(
                        ctx,
                        ReportEvent::new(
                            ReportKind::UnknownError,
                            format!("{DEFAULT_ERROR_KEY}_unknown"),
                        ),
                    )
                    .msg(source.to_string())
                    .error(source),
                );
            }
        }
    }

    async fn handle_panic(&self, ctx: &Arc<RequestContext>, msg: String) {
        if self.options.app_error_handler {
            self.dispatcher.responder().status(
                ctx,
                StatusCode::INTERNAL_SERVER_ERROR,
                Some(SERVER_ERROR_BODY),
            );
            self.reporter.report(
                with_fetch_id(ctx, ReportEvent::new(ReportKind::AppError, "app_error")).msg(&msg),
            );
        }
        self.hooks.on_app_error(&msg, ctx).await;
    }

    fn start_span(&self, ctx: &RequestContext) -> Option<Box<dyn TraceSpan>> {
        let tracer = self.tracer.as_ref()?;
        let path = ctx.path().trim().to_lowercase();
        if self.options.tracing_path_ignore.contains(&path) {
            return None;
        }
        Some(tracer.start_span(ctx.path()))
    }

    fn stamp(&self, ctx: &RequestContext, label: &str) {
        if self.options.timestamps {
            ctx.add_stamp(label);
        }
    }
}

#[async_trait]
impl RequestHandler for AppEntry {
    async fn handle(&self, ctx: Arc<RequestContext>) {
        Arc::clone(&ctx).scope(self.process(&ctx)).await;
    }
}

impl std::fmt::Debug for AppEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppEntry")
            .field("dispatcher", &self.dispatcher)
            .field("tracer", &self.tracer.is_some())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Returns the visitor id, issuing a cookie when the request has none.
fn ensure_uuid(ctx: &RequestContext) -> String {
    if let Some(uuid) = ctx.cookie(UUID_COOKIE).filter(|v| !v.is_empty()) {
        return uuid.to_string();
    }
    let uuid = Uuid::new_v4().to_string();
    ctx.set_cookie(
        SetCookie::new(UUID_COOKIE, uuid.clone())
            .max_age(UUID_COOKIE_MAX_AGE)
            .http_only(false),
    );
    uuid
}

fn with_fetch_id(ctx: &RequestContext, event: ReportEvent) -> ReportEvent {
    match ctx.fetch_id() {
        Some(id) => event.fetch_id(id),
        None => event,
    }
}

/// The text of a `panic!` payload, if it carried one.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> Option<String> {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
}
