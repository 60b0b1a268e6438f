//! Turning the response half of a context into an axum [`Response`].

use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::response::Response;
use perch_core::{ResponseBody, ResponseParts};
use tracing::warn;

/// Builds the HTTP response for `parts`.
///
/// Without an explicit content type, one is picked from the body kind.
/// Cookies that do not form a valid header value are dropped with a warning.
pub fn into_response(parts: ResponseParts) -> Response {
    let status = parts.effective_status();
    let default_type = match &parts.body {
        ResponseBody::Empty => None,
        ResponseBody::Text(_) => Some("text/plain; charset=utf-8"),
        ResponseBody::Json(_) => Some("application/json"),
        ResponseBody::Bytes(_) => Some("application/octet-stream"),
    };
    let content_type = parts.content_type.or(default_type.map(str::to_string));

    let body = match parts.body {
        ResponseBody::Empty => Body::empty(),
        ResponseBody::Text(text) => Body::from(text),
        ResponseBody::Json(value) => Body::from(value.to_string()),
        ResponseBody::Bytes(bytes) => Body::from(bytes),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.extend(parts.headers);
    if let Some(content_type) = content_type {
        match HeaderValue::try_from(content_type) {
            Ok(value) => {
                headers.insert(header::CONTENT_TYPE, value);
            }
            Err(e) => warn!(error = %e, "Dropping invalid content type"),
        }
    }
    for cookie in parts.cookies {
        match HeaderValue::try_from(cookie.header_value()) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            Err(e) => warn!(cookie = %cookie.name, error = %e, "Dropping invalid cookie"),
        }
    }

    response
}
