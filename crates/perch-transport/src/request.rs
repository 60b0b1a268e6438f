//! Turning an axum request into a [`RequestContext`].
//!
//! The body is read fully (up to a limit) and decoded by content type:
//!
//! | content type                        | body value                    |
//! |-------------------------------------|-------------------------------|
//! | `application/json`                  | the parsed JSON               |
//! | `application/x-www-form-urlencoded` | an object of the form fields  |
//! | `text/*`                            | a string                      |
//! | empty or anything else              | an empty object               |

use axum::body::Body;
use axum::http::{HeaderMap, Request, header};
use perch_core::RequestContext;
use serde_json::{Map, Value};

use crate::error::{TransportError, TransportResult};

/// Default request body limit: 1 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Options for request decoding.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Maximum accepted body size in bytes.
    pub body_limit: usize,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

/// Builds the context of one request.
pub async fn into_context(
    request: Request<Body>,
    options: &RequestOptions,
) -> TransportResult<RequestContext> {
    let (parts, body) = request.into_parts();

    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > options.body_limit) {
        return Err(TransportError::BodyTooLarge {
            limit: options.body_limit,
        });
    }
    let bytes = axum::body::to_bytes(body, options.body_limit)
        .await
        .map_err(|e| TransportError::InvalidBody(e.to_string()))?;
    let body = parse_body(content_type(&parts.headers), &bytes)?;

    let mut builder = RequestContext::builder(parts.method, parts.uri.path())
        .secure(parts.uri.scheme_str() == Some("https"))
        .body(body);
    if let Some(query) = parts.uri.query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            builder = builder.query(key, value);
        }
    }
    for (name, value) in parse_cookies(&parts.headers) {
        builder = builder.cookie(name, value);
    }

    Ok(builder.headers(parts.headers).build())
}

fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::trim)
        .unwrap_or_default()
}

/// Decodes a request body by its media type.
pub fn parse_body(media_type: &str, bytes: &[u8]) -> TransportResult<Value> {
    if bytes.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let media_type = media_type.to_ascii_lowercase();
    match media_type.as_str() {
        "application/json" => {
            serde_json::from_slice(bytes).map_err(|e| TransportError::InvalidBody(e.to_string()))
        }
        "application/x-www-form-urlencoded" => {
            let mut fields = Map::new();
            for (key, value) in url::form_urlencoded::parse(bytes) {
                let value = Value::String(value.into_owned());
                match fields.get_mut(key.as_ref()) {
                    Some(Value::Array(items)) => items.push(value),
                    Some(existing) => {
                        let first = existing.take();
                        *existing = Value::Array(vec![first, value]);
                    }
                    None => {
                        fields.insert(key.into_owned(), value);
                    }
                }
            }
            Ok(Value::Object(fields))
        }
        text if text.starts_with("text/") => {
            Ok(Value::String(String::from_utf8_lossy(bytes).into_owned()))
        }
        _ => Ok(Value::Object(Map::new())),
    }
}

/// Collects `name=value` pairs from every `Cookie` header.
pub fn parse_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}
