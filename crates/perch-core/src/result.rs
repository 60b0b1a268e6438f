//! Dispatch results and the JSON response envelope.
//!
//! An action produces an [`ActionResult`], a tagged union over the response
//! shapes the engine knows how to render. Its serde form is adjacently
//! tagged (`{"type": "json", "result": {...}}`), which also lets actions
//! hand back a raw [`serde_json::Value`] that is only interpreted at render
//! time.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DispatchError, DispatchResult};

// =============================================================================
// JSON envelope
// =============================================================================

/// Business status code carried by every JSON response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonCode(pub i64);

impl JsonCode {
    /// The request succeeded.
    pub const SUCCESS: Self = Self(0);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl Default for JsonCode {
    fn default() -> Self {
        Self::SUCCESS
    }
}

impl From<i64> for JsonCode {
    fn from(code: i64) -> Self {
        Self(code)
    }
}

impl std::fmt::Display for JsonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The JSON response envelope.
///
/// `version` and `fetch_id` are filled by the response helper right before
/// the body is written; actions normally leave them empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonBody {
    #[serde(default)]
    pub code: JsonCode,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_id: Option<String>,
}

impl JsonBody {
    /// A successful body wrapping `data`.
    pub fn success(data: Value) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    /// An error body with a code and message.
    pub fn error(code: impl Into<JsonCode>, msg: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    pub fn code(mut self, code: impl Into<JsonCode>) -> Self {
        self.code = code.into();
        self
    }

    pub fn msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }
}

// =============================================================================
// Send options
// =============================================================================

/// How a downloaded buffer is presented by the browser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentDisposition {
    #[default]
    Attachment,
    Inline,
}

impl ContentDisposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attachment => "attachment",
            Self::Inline => "inline",
        }
    }
}

/// Options for sending a file from disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SendOptions {
    /// Directory the path is resolved against; the path may not escape it.
    pub root: Option<PathBuf>,
    /// `Cache-Control: max-age` in seconds.
    pub max_age: Option<u64>,
    /// Adds `immutable` to `Cache-Control`.
    pub immutable: bool,
    /// Overrides the content type guessed from the extension.
    pub content_type: Option<String>,
}

// =============================================================================
// ActionResult
// =============================================================================

/// The typed value an action hands to the rendering stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "result", rename_all = "lowercase")]
pub enum ActionResult {
    /// A JSON envelope.
    Json(JsonBody),
    /// A file on disk.
    File {
        path: String,
        #[serde(default, rename = "opt")]
        options: SendOptions,
    },
    /// An in-memory download.
    Buffer {
        #[serde(rename = "buffer")]
        data: Vec<u8>,
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(default)]
        disposition: Option<ContentDisposition>,
    },
    /// A 302 redirect.
    Redirect { url: String },
    /// A server-rendered view.
    Render {
        view: String,
        #[serde(default)]
        params: Option<Value>,
    },
    /// A raw XML document.
    Xml {
        #[serde(rename = "xmlStr")]
        xml: String,
    },
}

impl ActionResult {
    /// JSON with [`JsonCode::SUCCESS`].
    pub fn json(data: impl Serialize) -> DispatchResult<Self> {
        Ok(Self::Json(JsonBody::success(serde_json::to_value(data)?)))
    }

    /// JSON from a prepared envelope.
    pub fn json_with(body: JsonBody) -> Self {
        Self::Json(body)
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::file_with(path, SendOptions::default())
    }

    pub fn file_with(path: impl Into<String>, options: SendOptions) -> Self {
        Self::File {
            path: path.into(),
            options,
        }
    }

    pub fn buffer(data: impl Into<Vec<u8>>, file_name: impl Into<String>) -> Self {
        Self::Buffer {
            data: data.into(),
            file_name: file_name.into(),
            disposition: None,
        }
    }

    pub fn buffer_with(
        data: impl Into<Vec<u8>>,
        file_name: impl Into<String>,
        disposition: ContentDisposition,
    ) -> Self {
        Self::Buffer {
            data: data.into(),
            file_name: file_name.into(),
            disposition: Some(disposition),
        }
    }

    pub fn redirect(url: impl Into<String>) -> Self {
        Self::Redirect { url: url.into() }
    }

    pub fn render(view: impl Into<String>, params: Option<Value>) -> Self {
        Self::Render {
            view: view.into(),
            params,
        }
    }

    pub fn xml(xml: impl Into<String>) -> Self {
        Self::Xml { xml: xml.into() }
    }

    /// The serde tag of this result.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::File { .. } => "file",
            Self::Buffer { .. } => "buffer",
            Self::Redirect { .. } => "redirect",
            Self::Render { .. } => "render",
            Self::Xml { .. } => "xml",
        }
    }
}

// =============================================================================
// Action return values
// =============================================================================

/// What an action body produced, before it is validated for rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionReturn {
    /// Nothing was returned.
    Empty,
    /// A typed result.
    Result(ActionResult),
    /// A raw tagged value, decoded at render time.
    Tagged(Value),
}

/// Why an [`ActionReturn`] cannot be rendered.
#[derive(Debug)]
pub enum ReturnError {
    Empty,
    UnknownTag(serde_json::Error),
}

impl ActionReturn {
    /// Resolves the return value into a renderable result.
    pub fn into_result(self) -> Result<ActionResult, ReturnError> {
        match self {
            Self::Empty => Err(ReturnError::Empty),
            Self::Result(result) => Ok(result),
            Self::Tagged(value) => serde_json::from_value(value).map_err(ReturnError::UnknownTag),
        }
    }
}

/// Conversion of an action's output into an [`ActionReturn`].
pub trait IntoActionReturn {
    fn into_action_return(self) -> DispatchResult<ActionReturn>;
}

impl IntoActionReturn for ActionReturn {
    fn into_action_return(self) -> DispatchResult<ActionReturn> {
        Ok(self)
    }
}

impl IntoActionReturn for ActionResult {
    fn into_action_return(self) -> DispatchResult<ActionReturn> {
        Ok(ActionReturn::Result(self))
    }
}

impl IntoActionReturn for JsonBody {
    fn into_action_return(self) -> DispatchResult<ActionReturn> {
        Ok(ActionReturn::Result(ActionResult::Json(self)))
    }
}

impl IntoActionReturn for () {
    fn into_action_return(self) -> DispatchResult<ActionReturn> {
        Ok(ActionReturn::Empty)
    }
}

impl IntoActionReturn for Value {
    fn into_action_return(self) -> DispatchResult<ActionReturn> {
        Ok(match self {
            Value::Null => ActionReturn::Empty,
            other => ActionReturn::Tagged(other),
        })
    }
}

impl<T: IntoActionReturn> IntoActionReturn for Option<T> {
    fn into_action_return(self) -> DispatchResult<ActionReturn> {
        match self {
            Some(inner) => inner.into_action_return(),
            None => Ok(ActionReturn::Empty),
        }
    }
}

impl<T, E> IntoActionReturn for Result<T, E>
where
    T: IntoActionReturn,
    E: Into<DispatchError>,
{
    fn into_action_return(self) -> DispatchResult<ActionReturn> {
        self.map_err(Into::into)?.into_action_return()
    }
}
