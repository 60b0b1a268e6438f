//! End-to-end tests driving a fully assembled application through axum.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use parking_lot::Mutex;
use perch_core::http::Method;
use perch_core::{
    ActionResult, BoxError, DispatchError, DispatchResult, JsonBody, ReportEvent, ReportKind,
    Reporter, RequestContext,
};
use perch_framework::{Args, ControllerDef, ROUTER_RETURN_ERROR};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_test::{assert_err, assert_ok};
use tower::ServiceExt;

use crate::{AppHooks, PerchApp, PerchConfig, RuntimeError, UNCAUGHT_PANIC_KEY, panic};

#[derive(Default)]
struct Capture(Mutex<Vec<ReportEvent>>);

impl Capture {
    fn keys(&self) -> Vec<String> {
        self.0.lock().iter().map(|e| e.key.clone()).collect()
    }

    fn find(&self, key: &str) -> Option<ReportEvent> {
        self.0.lock().iter().find(|e| e.key == key).cloned()
    }
}

impl Reporter for Capture {
    fn report(&self, event: ReportEvent) {
        self.0.lock().push(event);
    }
}

#[derive(Deserialize)]
struct Greet {
    name: String,
}

async fn greet(Args(greet): Args<Greet>) -> JsonBody {
    JsonBody::success(json!({ "hello": greet.name }))
}

async fn list() -> DispatchResult<ActionResult> {
    ActionResult::json(json!([1, 2, 3]))
}

async fn boom() -> JsonBody {
    panic!("boom")
}

async fn empty() {}

async fn fails() -> DispatchResult<ActionResult> {
    Err(DispatchError::unknown("disk on fire"))
}

fn config(allow_http: bool) -> PerchConfig {
    let mut config = PerchConfig::default();
    config.server.allow_http = allow_http;
    config.app.version = "1.2.3".to_string();
    config.errors.disable_uncaught_handler = true;
    config
}

async fn app_with(config: PerchConfig, hooks: Option<Box<dyn FnOnce(PerchApp) -> PerchApp>>) -> (Router, Arc<Capture>) {
    let capture = Arc::new(Capture::default());
    let mut app = PerchApp::from_config(config).reporter(capture.clone());

    let user = ControllerDef::builder("user")
        .extends(app.base_controller())
        .filter(app.builtins().http_method.with(Method::GET))
        .action("greet", greet)
        .action("list", list)
        .action("boom", boom)
        .action("empty", empty)
        .action("fails", fails)
        .build()
        .unwrap();
    app = app.controller(user);
    if let Some(customize) = hooks {
        app = customize(app);
    }

    let ready = app.init().await.unwrap();
    (ready.router(), capture)
}

async fn app(allow_http: bool) -> (Router, Arc<Capture>) {
    app_with(config(allow_http), None).await
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn json_actions_answer_with_the_envelope() {
    let (router, capture) = app(true).await;

    let (status, headers, body) = send(router, get("/user/greet?name=ann")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["data"], json!({ "hello": "ann" }));
    assert_eq!(body["version"], "1.2.3");
    assert!(body["fetchId"].is_string());

    assert_eq!(capture.keys(), vec!["request_entry_begin", "request_entry_end"]);
    let end = capture.find("request_entry_end").unwrap();
    assert_eq!(end.kind, ReportKind::End);
    let details = end.details.unwrap();
    assert_eq!(details["status"], 200);
    assert!(details["timespan"].is_u64());
}

#[tokio::test]
async fn visitors_get_a_uuid_cookie_once() {
    let (router, _) = app(true).await;

    let (_, headers, _) = send(router.clone(), get("/user/list")).await;
    let cookie = headers[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.starts_with("uuid="));
    assert!(cookie.contains("Max-Age=86400000"));
    assert!(!cookie.contains("HttpOnly"));

    let request = Request::builder()
        .uri("/user/list")
        .header(header::COOKIE, "uuid=known")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = send(router, request).await;
    assert!(headers.get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn unmatched_routes_are_not_found() {
    let (router, capture) = app(true).await;

    let (status, _, body) = send(router.clone(), get("/nothing/here")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, b"Not Found");

    let (status, _, _) = send(router, get("/user/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(capture.find("defaultOnRequestError").is_some());
}

#[tokio::test]
async fn method_filter_rejects_post() {
    let (router, _) = app(true).await;

    let request = Request::builder()
        .method("POST")
        .uri("/user/list")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn plain_http_is_refused_unless_allowed() {
    let (router, capture) = app(false).await;

    let (status, _, body) = send(router.clone(), get("/user/list")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, b"please use https");
    let event = capture.find("https_only").unwrap();
    assert!(event.error.unwrap().contains("404"));

    let request = Request::builder()
        .uri("/user/list")
        .header("x-forwarded-proto", "https")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn panics_become_server_errors() {
    let (router, capture) = app(true).await;

    let (status, _, body) = send(router, get("/user/boom")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, b"Server Error");
    let event = capture.find("app_error").unwrap();
    assert_eq!(event.kind, ReportKind::AppError);
    assert_eq!(event.msg.as_deref(), Some("boom"));
    assert!(capture.find("request_entry_end").is_some());
}

#[tokio::test]
async fn empty_returns_are_server_errors() {
    let (router, capture) = app(true).await;

    let (status, _, body) = send(router, get("/user/empty")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, ROUTER_RETURN_ERROR.as_bytes());
    assert!(capture.find("router_user_empty_actionReturn_null").is_some());
}

#[tokio::test]
async fn unknown_errors_are_answered_and_reported() {
    let (router, capture) = app(true).await;

    let (status, _, body) = send(router, get("/user/fails")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, b"Server Error");
    let event = capture.find("defaultOnRequestError_unknown").unwrap();
    assert_eq!(event.kind, ReportKind::UnknownError);
    assert_eq!(event.msg.as_deref(), Some("disk on fire"));
    assert!(event.fetch_id.is_some());
}

#[tokio::test]
async fn panics_outside_requests_are_reported() {
    let mut config = config(true);
    config.errors.disable_uncaught_handler = false;
    let (router, capture) = app_with(config, None).await;

    let stray = tokio::spawn(async { panic!("stray worker") }).await;
    assert!(stray.unwrap_err().is_panic());

    let (status, _, _) = send(router, get("/user/boom")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    panic::uninstall();

    let uncaught: Vec<ReportEvent> = capture
        .0
        .lock()
        .iter()
        .filter(|e| e.key == UNCAUGHT_PANIC_KEY)
        .cloned()
        .collect();
    assert_eq!(uncaught.len(), 1);
    assert_eq!(uncaught[0].kind, ReportKind::AppError);
    assert_eq!(uncaught[0].msg.as_deref(), Some("stray worker"));
    assert!(uncaught[0].details.as_ref().unwrap()["location"].is_string());
    assert!(capture.find("app_error").is_some());
}

#[tokio::test]
async fn prefix_is_stripped_before_routing() {
    let mut config = config(true);
    config.server.prefix = Some("/api".to_string());
    let (router, _) = app_with(config, None).await;

    let (status, _, _) = send(router.clone(), get("/api/user/list")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(router, get("/user/list")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[derive(Default)]
struct Gate {
    errors: Mutex<Vec<String>>,
    ended: Mutex<Vec<String>>,
}

#[async_trait]
impl AppHooks for Arc<Gate> {
    async fn on_request_begin(&self, ctx: &Arc<RequestContext>) -> DispatchResult<()> {
        if ctx.header("x-token").is_none() {
            return Err(DispatchError::status(StatusCode::FORBIDDEN));
        }
        Ok(())
    }

    async fn on_request_end(&self, ctx: &Arc<RequestContext>) -> DispatchResult<()> {
        self.ended.lock().push(ctx.path().to_string());
        Ok(())
    }

    async fn on_request_error(&self, err: &DispatchError, _ctx: &Arc<RequestContext>) {
        self.errors.lock().push(err.to_string());
    }
}

#[tokio::test]
async fn request_hooks_wrap_dispatch() {
    let gate = Arc::new(Gate::default());
    let hooks = gate.clone();
    let (router, _) = app_with(
        config(true),
        Some(Box::new(move |app: PerchApp| app.hooks(hooks))),
    )
    .await;

    let (status, _, _) = send(router.clone(), get("/user/list")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(gate.errors.lock().len(), 1);
    assert!(gate.ended.lock().is_empty());

    let request = Request::builder()
        .uri("/user/list")
        .header("x-token", "t")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(*gate.ended.lock(), vec!["/user/list"]);
}

struct RefuseStartup;

#[async_trait]
impl AppHooks for RefuseStartup {
    async fn on_pre_init(&self, _config: &PerchConfig) -> Result<(), BoxError> {
        Err("database unreachable".into())
    }
}

#[tokio::test]
async fn failing_pre_init_aborts_startup() {
    let app = PerchApp::from_config(config(true)).hooks(RefuseStartup);

    let err = assert_err!(app.init().await);
    assert!(matches!(err, RuntimeError::Hook { hook: "on_pre_init", .. }));
}

#[tokio::test]
async fn controllers_must_extend_the_app_base() {
    let app = PerchApp::from_config(config(true));
    let stray = ControllerDef::builder("stray")
        .extends(&ControllerDef::base())
        .action("list", list)
        .build()
        .unwrap();

    let err = assert_err!(app.controller(stray).init().await);
    assert!(matches!(err, RuntimeError::Registration(_)));
}

#[tokio::test]
async fn serves_until_shutdown() {
    let mut config = config(true);
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    let ready = assert_ok!(PerchApp::from_config(config).init().await);

    assert_ok!(ready.run_until(async {}).await);
}
