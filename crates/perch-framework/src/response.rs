//! Writing action results into the response.
//!
//! [`Responder`] is the rendering stage of the pipeline. It owns the pieces
//! of application configuration a response depends on (the version stamped
//! into JSON bodies, the default messages of JSON error codes) and the
//! optional render and file-send collaborators.

use std::collections::HashMap;

use perch_core::http::header::{self, HeaderValue};
use perch_core::http::StatusCode;
use perch_core::{
    ActionResult, BoxedFileSender, BoxedRenderer, ContentDisposition, DispatchError,
    DispatchResult, JsonBody, JsonCode, RequestContext, ResponseBody, SendOptions,
};
use serde_json::Value;

/// Generic body of a 500 response.
pub const SERVER_ERROR_BODY: &str = "Server Error";

const JSON_CONTENT_TYPE: &str = "application/json";
const XML_CONTENT_TYPE: &str = "application/xml";
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// Renders [`ActionResult`]s and status answers into a [`RequestContext`].
#[derive(Clone, Default)]
pub struct Responder {
    version: String,
    messages: HashMap<JsonCode, String>,
    renderer: Option<BoxedRenderer>,
    file_sender: Option<BoxedFileSender>,
}

impl Responder {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Default::default()
        }
    }

    /// Default messages for non-success JSON codes.
    pub fn messages(mut self, messages: HashMap<JsonCode, String>) -> Self {
        self.messages = messages;
        self
    }

    pub fn renderer(mut self, renderer: BoxedRenderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn file_sender(mut self, sender: BoxedFileSender) -> Self {
        self.file_sender = Some(sender);
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    /// Writes `result` using the matching helper.
    pub async fn respond(&self, ctx: &RequestContext, result: ActionResult) -> DispatchResult<()> {
        match result {
            ActionResult::Json(body) => self.json(ctx, body),
            ActionResult::Redirect { url } => self.redirect(ctx, &url),
            ActionResult::File { path, options } => self.file(ctx, &path, &options).await?,
            ActionResult::Render { view, params } => self.render(ctx, &view, params).await?,
            ActionResult::Buffer {
                data,
                file_name,
                disposition,
            } => self.buffer(ctx, data, &file_name, disposition.unwrap_or_default())?,
            ActionResult::Xml { xml } => self.xml(ctx, xml),
        }
        Ok(())
    }

    /// Writes a JSON envelope with status 200.
    ///
    /// `version` and `fetchId` are always overwritten. An empty `msg` is
    /// replaced by the configured message of a non-success code, or by `""`.
    pub fn json(&self, ctx: &RequestContext, mut body: JsonBody) {
        body.version = Some(self.version.clone());
        body.fetch_id = ctx.fetch_id();
        let msg = body.msg.take().filter(|m| !m.is_empty()).or_else(|| {
            (!body.code.is_success())
                .then(|| self.messages.get(&body.code).cloned())
                .flatten()
        });
        body.msg = Some(msg.unwrap_or_default());

        let value = serde_json::to_value(&body).unwrap_or(Value::Null);
        ctx.set_status(StatusCode::OK);
        ctx.set_content_type(JSON_CONTENT_TYPE);
        ctx.set_body(ResponseBody::Json(value));
    }

    pub fn xml(&self, ctx: &RequestContext, xml: String) {
        ctx.set_status(StatusCode::OK);
        ctx.set_content_type(XML_CONTENT_TYPE);
        ctx.set_body(ResponseBody::Text(xml));
    }

    /// Answers with `status` and `msg`, or the status' canonical reason.
    pub fn status(&self, ctx: &RequestContext, status: StatusCode, msg: Option<&str>) {
        let body = match msg {
            Some(msg) if !msg.is_empty() => msg.to_string(),
            _ => status.canonical_reason().unwrap_or_default().to_string(),
        };
        ctx.set_status(status);
        ctx.set_content_type(TEXT_CONTENT_TYPE);
        ctx.set_body(ResponseBody::Text(body));
    }

    pub fn redirect(&self, ctx: &RequestContext, url: &str) {
        ctx.redirect(url);
    }

    /// Sends an in-memory download.
    pub fn buffer(
        &self,
        ctx: &RequestContext,
        data: Vec<u8>,
        file_name: &str,
        disposition: ContentDisposition,
    ) -> DispatchResult<()> {
        let value = format!(
            "{};filename={}",
            disposition.as_str(),
            urlencoding::encode(file_name)
        );
        let value = HeaderValue::try_from(value).map_err(|e| {
            DispatchError::server_from(SERVER_ERROR_BODY, "responseHelper_buffer_error", e)
        })?;
        ctx.set_header(header::CONTENT_DISPOSITION, value);
        ctx.set_status(StatusCode::OK);
        ctx.set_content_type(BINARY_CONTENT_TYPE);
        ctx.set_body(ResponseBody::Bytes(data));
        Ok(())
    }

    /// Sends a file through the file-send collaborator.
    pub async fn file(
        &self,
        ctx: &RequestContext,
        path: &str,
        options: &SendOptions,
    ) -> DispatchResult<()> {
        let Some(sender) = &self.file_sender else {
            return Err(DispatchError::server_keyed(
                "file sender not initialized",
                "responseHelper_file_noInit",
            ));
        };
        sender
            .send(ctx, path, options)
            .await
            .map_err(|e| DispatchError::server_from(SERVER_ERROR_BODY, "responseHelper_file_error", e))
    }

    /// Renders a view through the render collaborator.
    pub async fn render(
        &self,
        ctx: &RequestContext,
        view: &str,
        params: Option<Value>,
    ) -> DispatchResult<()> {
        let Some(renderer) = &self.renderer else {
            return Err(DispatchError::server_keyed(
                "render middleware not initialized",
                "responseHelper_render_noInit",
            ));
        };
        let html = renderer.render(view, params.as_ref()).await.map_err(|e| {
            DispatchError::server_from(SERVER_ERROR_BODY, "responseHelper_render_error", e)
        })?;
        ctx.set_status(StatusCode::OK);
        ctx.set_content_type(HTML_CONTENT_TYPE);
        ctx.set_body(ResponseBody::Text(html));
        Ok(())
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("version", &self.version)
            .field("messages", &self.messages.len())
            .field("renderer", &self.renderer.is_some())
            .field("file_sender", &self.file_sender.is_some())
            .finish()
    }
}
