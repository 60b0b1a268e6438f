//! Application lifecycle hooks.

use std::sync::Arc;

use async_trait::async_trait;
use perch_core::{BoxError, DispatchError, DispatchResult, RequestContext};

use crate::config::PerchConfig;

/// Callbacks around startup, shutdown and every request. All are optional.
///
/// ```rust,ignore
/// struct Audit;
///
/// #[async_trait]
/// impl AppHooks for Audit {
///     async fn on_request_begin(&self, ctx: &Arc<RequestContext>) -> DispatchResult<()> {
///         tracing::info!(path = %ctx.path(), "incoming");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait AppHooks: Send + Sync + 'static {
    /// Before controllers are registered. A failure aborts startup.
    async fn on_pre_init(&self, _config: &PerchConfig) -> Result<(), BoxError> {
        Ok(())
    }

    /// After registration, before the listener accepts requests.
    async fn on_post_init(&self, _config: &PerchConfig) -> Result<(), BoxError> {
        Ok(())
    }

    /// After the server has shut down.
    async fn on_end(&self) {}

    /// Before dispatch. An error skips dispatch and goes to error handling.
    async fn on_request_begin(&self, _ctx: &Arc<RequestContext>) -> DispatchResult<()> {
        Ok(())
    }

    /// After a successful dispatch.
    async fn on_request_end(&self, _ctx: &Arc<RequestContext>) -> DispatchResult<()> {
        Ok(())
    }

    /// Sees every request error before the default handler does.
    async fn on_request_error(&self, _err: &DispatchError, _ctx: &Arc<RequestContext>) {}

    /// Sees a panic that escaped request handling.
    async fn on_app_error(&self, _msg: &str, _ctx: &Arc<RequestContext>) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAppHooks;

impl AppHooks for NoAppHooks {}
