//! # Perch Transport
//!
//! The HTTP edge of Perch, built on axum:
//! - decoding requests into [`RequestContext`](perch_core::RequestContext)s
//! - encoding the response half back into HTTP
//! - a file sender on `tokio::fs`
//! - a minijinja view renderer (feature `templates`)
//! - the listener and graceful-shutdown serve loop

pub mod error;
pub mod file;
pub mod request;
pub mod response;
pub mod server;
pub mod service;

#[cfg(feature = "templates")]
pub mod render;

pub use error::{TransportError, TransportResult};
pub use file::{FsFileSender, SendError};
pub use request::{DEFAULT_BODY_LIMIT, RequestOptions, into_context};
pub use response::into_response;
pub use server::HttpServer;
pub use service::{RequestHandler, router};

#[cfg(feature = "templates")]
pub use render::MiniJinjaRenderer;

pub use tokio_util::sync::CancellationToken;
