//! Collaborator capabilities consumed by the dispatch pipeline.
//!
//! The engine does not render templates, read files or export traces itself.
//! It calls out through the narrow traits below; the transport and runtime
//! crates provide the implementations.
//!
//! ```rust,ignore
//! struct StaticRenderer;
//!
//! #[async_trait]
//! impl ViewRenderer for StaticRenderer {
//!     async fn render(&self, view: &str, _params: Option<&Value>) -> Result<String, BoxError> {
//!         Ok(format!("<h1>{view}</h1>"))
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::RequestContext;
use crate::error::BoxError;
use crate::result::SendOptions;

// =============================================================================
// Render
// =============================================================================

/// Resolves a named view plus parameters to HTML.
#[async_trait]
pub trait ViewRenderer: Send + Sync {
    async fn render(&self, view: &str, params: Option<&Value>) -> Result<String, BoxError>;
}

/// Shared renderer handle.
pub type BoxedRenderer = Arc<dyn ViewRenderer>;

// =============================================================================
// File send
// =============================================================================

/// Writes a file from disk into the response of `ctx`.
#[async_trait]
pub trait FileSender: Send + Sync {
    async fn send(
        &self,
        ctx: &RequestContext,
        path: &str,
        options: &SendOptions,
    ) -> Result<(), BoxError>;
}

/// Shared file sender handle.
pub type BoxedFileSender = Arc<dyn FileSender>;

// =============================================================================
// Tracing
// =============================================================================

/// Starts a trace span per request path.
pub trait RequestTracer: Send + Sync {
    fn start_span(&self, path: &str) -> Box<dyn TraceSpan>;
}

/// An open span; finished exactly once.
pub trait TraceSpan: Send {
    fn log(&mut self, event: &str, value: &str);

    fn finish(self: Box<Self>);
}

/// Shared tracer handle.
pub type BoxedTracer = Arc<dyn RequestTracer>;
