//! The axum [`Router`] every request goes through.
//!
//! Routing by path is the application's job, so the router has a single
//! fallback handler: decode the request into a [`RequestContext`], hand it
//! to the [`RequestHandler`], encode whatever the handler wrote.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use perch_core::RequestContext;
use tracing::warn;

use crate::request::{RequestOptions, into_context};
use crate::response::into_response;

/// Handles one request by writing into the response half of its context.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: Arc<RequestContext>);
}

#[derive(Clone)]
struct ServiceState {
    handler: Arc<dyn RequestHandler>,
    options: Arc<RequestOptions>,
}

/// Builds the router for `handler`.
pub fn router(handler: Arc<dyn RequestHandler>, options: RequestOptions) -> Router {
    Router::new().fallback(serve).with_state(ServiceState {
        handler,
        options: Arc::new(options),
    })
}

async fn serve(State(state): State<ServiceState>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let ctx = match into_context(request, &state.options).await {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            warn!(path = %path, error = %e, "Rejected request");
            return (e.status(), e.to_string()).into_response();
        }
    };

    state.handler.handle(Arc::clone(&ctx)).await;
    into_response(ctx.take_response())
}
