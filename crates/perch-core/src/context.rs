//! The per-request context.
//!
//! [`RequestContext`] is the transport-facing object every filter hook and
//! action sees. The request half is immutable once built; the response half
//! lives behind a lock so that hooks holding an `Arc<RequestContext>` can
//! write status, body, headers and cookies.
//!
//! # Current context
//!
//! While a request is being handled, the context is also reachable through a
//! task-local:
//!
//! ```rust,ignore
//! use perch_core::RequestContext;
//!
//! async fn audit() {
//!     if let Some(ctx) = RequestContext::current() {
//!         tracing::info!(path = %ctx.path(), "audited");
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::{self, HeaderName, HeaderValue};
use http::{Extensions, HeaderMap, Method, StatusCode};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};

tokio::task_local! {
    static CURRENT: Arc<RequestContext>;
}

// =============================================================================
// Response state
// =============================================================================

/// The body written so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseBody {
    #[default]
    Empty,
    Text(String),
    Json(Value),
    Bytes(Vec<u8>),
}

impl ResponseBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// The response half of a [`RequestContext`].
#[derive(Debug, Clone, Default)]
pub struct ResponseParts {
    pub status: Option<StatusCode>,
    pub body: ResponseBody,
    pub content_type: Option<String>,
    pub headers: HeaderMap,
    pub cookies: Vec<SetCookie>,
}

impl ResponseParts {
    /// The effective status: explicit, else 200 with a body and 404 without.
    pub fn effective_status(&self) -> StatusCode {
        self.status.unwrap_or(if self.body.is_empty() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::OK
        })
    }
}

/// A cookie queued for the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub max_age: Option<Duration>,
    pub path: Option<String>,
    pub http_only: bool,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            path: Some("/".to_string()),
            http_only: true,
        }
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Formats the `Set-Cookie` header value.
    pub fn header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={}", max_age.as_secs()));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

/// A named point in time relative to the start of the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stamp {
    pub label: String,
    pub elapsed_ms: u128,
}

// =============================================================================
// RequestContext
// =============================================================================

/// Everything known about one HTTP request while it is being dispatched.
pub struct RequestContext {
    method: Method,
    path: String,
    secure: bool,
    query: Map<String, Value>,
    headers: HeaderMap,
    cookies: HashMap<String, String>,
    body: Value,
    started_at: Instant,
    fetch_id: RwLock<Option<String>>,
    response: Mutex<ResponseParts>,
    stamps: Mutex<Vec<Stamp>>,
    extensions: Mutex<Extensions>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("fetch_id", &*self.fetch_id.read())
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    /// Starts building a context.
    pub fn builder(method: Method, path: impl Into<String>) -> RequestContextBuilder {
        RequestContextBuilder::new(method, path)
    }

    /// Runs `fut` with `self` installed as the current context.
    pub async fn scope<F: Future>(self: Arc<Self>, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    /// The context of the request being handled by the current task.
    pub fn current() -> Option<Arc<Self>> {
        CURRENT.try_with(Arc::clone).ok()
    }

    // ─── request ───

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &Map<String, Value> {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A request header as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// The parsed request body; `Null` when there was none.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Whether the request reached us (or the proxy in front of us) over TLS.
    pub fn is_https(&self) -> bool {
        self.secure
            || self
                .header("x-forwarded-proto")
                .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
    }

    pub fn fetch_id(&self) -> Option<String> {
        self.fetch_id.read().clone()
    }

    pub fn set_fetch_id(&self, fetch_id: impl Into<String>) {
        *self.fetch_id.write() = Some(fetch_id.into());
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    // ─── stamps ───

    /// Records a named timestamp.
    pub fn add_stamp(&self, label: impl Into<String>) {
        self.stamps.lock().push(Stamp {
            label: label.into(),
            elapsed_ms: self.started_at.elapsed().as_millis(),
        });
    }

    pub fn stamps(&self) -> Vec<Stamp> {
        self.stamps.lock().clone()
    }

    // ─── response ───

    pub fn set_status(&self, status: StatusCode) {
        self.response.lock().status = Some(status);
    }

    pub fn status(&self) -> StatusCode {
        self.response.lock().effective_status()
    }

    /// Replaces the body. Sets the status to 200 unless one was set already.
    pub fn set_body(&self, body: ResponseBody) {
        let mut response = self.response.lock();
        if response.status.is_none() {
            response.status = Some(StatusCode::OK);
        }
        response.body = body;
    }

    pub fn set_content_type(&self, content_type: impl Into<String>) {
        self.response.lock().content_type = Some(content_type.into());
    }

    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.response.lock().headers.insert(name, value);
    }

    pub fn set_cookie(&self, cookie: SetCookie) {
        self.response.lock().cookies.push(cookie);
    }

    /// Answers with a 302 to `url`.
    pub fn redirect(&self, url: &str) {
        let mut response = self.response.lock();
        response.status = Some(StatusCode::FOUND);
        if let Ok(location) = HeaderValue::from_str(url) {
            response.headers.insert(header::LOCATION, location);
        }
        response.content_type = Some("text/plain; charset=utf-8".to_string());
        response.body = ResponseBody::Text(format!("Redirecting to {url}."));
    }

    /// A snapshot of the response written so far.
    pub fn response(&self) -> ResponseParts {
        self.response.lock().clone()
    }

    /// Takes the response out, leaving an empty one behind.
    pub fn take_response(&self) -> ResponseParts {
        std::mem::take(&mut *self.response.lock())
    }

    // ─── state ───

    /// Stores typed per-request state.
    pub fn insert_state<T: Clone + Send + Sync + 'static>(&self, value: T) {
        self.extensions.lock().insert(value);
    }

    pub fn state<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.extensions.lock().get::<T>().cloned()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`RequestContext`], used by transports and tests.
#[derive(Debug)]
pub struct RequestContextBuilder {
    method: Method,
    path: String,
    secure: bool,
    query: Map<String, Value>,
    headers: HeaderMap,
    cookies: HashMap<String, String>,
    body: Value,
    fetch_id: Option<String>,
}

impl RequestContextBuilder {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            secure: false,
            query: Map::new(),
            headers: HeaderMap::new(),
            cookies: HashMap::new(),
            body: Value::Null,
            fetch_id: None,
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Adds a query parameter. Repeated keys collect into an array.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = Value::String(value.into());
        match self.query.get_mut(&key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                self.query.insert(key, value);
            }
        }
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn fetch_id(mut self, fetch_id: impl Into<String>) -> Self {
        self.fetch_id = Some(fetch_id.into());
        self
    }

    pub fn build(self) -> RequestContext {
        RequestContext {
            method: self.method,
            path: self.path,
            secure: self.secure,
            query: self.query,
            headers: self.headers,
            cookies: self.cookies,
            body: self.body,
            started_at: Instant::now(),
            fetch_id: RwLock::new(self.fetch_id),
            response: Mutex::new(ResponseParts::default()),
            stamps: Mutex::new(Vec::new()),
            extensions: Mutex::new(Extensions::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_query_keys_collect() {
        let ctx = RequestContext::builder(Method::GET, "/")
            .query("tag", "a")
            .query("tag", "b")
            .query("page", "2")
            .build();
        assert_eq!(ctx.query()["tag"], serde_json::json!(["a", "b"]));
        assert_eq!(ctx.query()["page"], serde_json::json!("2"));
    }

    #[test]
    fn forwarded_proto_marks_https() {
        let ctx = RequestContext::builder(Method::GET, "/")
            .header(
                HeaderName::from_static("x-forwarded-proto"),
                HeaderValue::from_static("HTTPS"),
            )
            .build();
        assert!(ctx.is_https());
        assert!(!RequestContext::builder(Method::GET, "/").build().is_https());
    }

    #[test]
    fn response_defaults_follow_body() {
        let ctx = RequestContext::builder(Method::GET, "/").build();
        assert_eq!(ctx.status(), StatusCode::NOT_FOUND);
        ctx.set_body(ResponseBody::Text("hi".into()));
        assert_eq!(ctx.status(), StatusCode::OK);
    }

    #[test]
    fn redirect_sets_location() {
        let ctx = RequestContext::builder(Method::GET, "/").build();
        ctx.redirect("/login");
        let response = ctx.response();
        assert_eq!(response.status, Some(StatusCode::FOUND));
        assert_eq!(response.headers[header::LOCATION], "/login");
    }

    #[test]
    fn cookie_header_value() {
        let cookie = SetCookie::new("uuid", "abc")
            .max_age(Duration::from_secs(60))
            .http_only(false);
        assert_eq!(cookie.header_value(), "uuid=abc; Path=/; Max-Age=60");
    }

    #[tokio::test]
    async fn current_context_is_task_local() {
        assert!(RequestContext::current().is_none());
        let ctx = Arc::new(RequestContext::builder(Method::GET, "/scoped").build());
        let path = ctx
            .clone()
            .scope(async { RequestContext::current().map(|c| c.path().to_string()) })
            .await;
        assert_eq!(path.as_deref(), Some("/scoped"));
    }
}
