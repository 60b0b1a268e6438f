//! Request spans on top of `tracing`.

use perch_core::{RequestTracer, TraceSpan};
use tracing::{Span, info, info_span};

/// A [`RequestTracer`] that opens one `tracing` span per request path.
///
/// Span logs become events inside the span, so any subscriber layer
/// (OpenTelemetry included) sees them with the request attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanTracer;

impl RequestTracer for SpanTracer {
    fn start_span(&self, path: &str) -> Box<dyn TraceSpan> {
        Box::new(RequestSpan {
            span: info_span!("request", path = %path),
        })
    }
}

struct RequestSpan {
    span: Span,
}

impl TraceSpan for RequestSpan {
    fn log(&mut self, event: &str, value: &str) {
        info!(parent: &self.span, event, value, "span log");
    }

    fn finish(self: Box<Self>) {
        drop(self.span);
    }
}
