//! Application assembly and startup.
//!
//! ```rust,ignore
//! use perch_runtime::PerchApp;
//!
//! let app = PerchApp::builder().config_file("perch.toml").build()?;
//! let users = ControllerDef::builder("user")
//!     .extends(app.base_controller())
//!     .action("list", list_users)
//!     .build()?;
//!
//! app.controller(users).run().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use perch_core::{BoxedFileSender, BoxedRenderer, BoxedTracer, Reporter};
use perch_framework::{
    BuiltinFilters, ControllerDef, ControllerRegistry, DispatchOptions, Dispatcher,
    FilterAttachment, Responder,
};
use perch_transport::{CancellationToken, FsFileSender, HttpServer, RequestOptions, router};
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::{ConfigLoader, ConfigResult, PerchConfig};
use crate::entry::{AppEntry, EntryOptions};
use crate::error::{RuntimeError, RuntimeResult};
use crate::hooks::{AppHooks, NoAppHooks};
use crate::logging;
use crate::panic;
use crate::report::TracingReporter;
use crate::trace::SpanTracer;

/// A Perch application before startup.
///
/// Collects controllers, default filters and collaborators; [`init`](Self::init)
/// registers everything and yields a [`ReadyApp`] that can serve.
pub struct PerchApp {
    config: PerchConfig,
    base: Arc<ControllerDef>,
    builtins: BuiltinFilters,
    controllers: Vec<Arc<ControllerDef>>,
    default_filters: Vec<FilterAttachment>,
    hooks: Arc<dyn AppHooks>,
    reporter: Arc<dyn Reporter>,
    tracer: Option<BoxedTracer>,
    renderer: Option<BoxedRenderer>,
    file_sender: Option<BoxedFileSender>,
}

impl PerchApp {
    /// Loads configuration from the current directory, falling back to
    /// defaults when loading fails.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                PerchConfig::default()
            });
        Self::from_config(config)
    }

    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    /// Creates an application from a loaded configuration and initializes
    /// logging from it.
    pub fn from_config(config: PerchConfig) -> Self {
        logging::init_from_config(&config.logging);
        info!(
            log_level = %config.logging.level,
            addr = %config.server.bind_addr(),
            version = %config.app.version,
            "Application configured"
        );

        Self {
            config,
            base: ControllerDef::base(),
            builtins: BuiltinFilters::new(),
            controllers: Vec::new(),
            default_filters: Vec::new(),
            hooks: Arc::new(NoAppHooks),
            reporter: Arc::new(TracingReporter),
            tracer: None,
            renderer: None,
            file_sender: None,
        }
    }

    pub fn config(&self) -> &PerchConfig {
        &self.config
    }

    /// The base every registered controller must extend.
    pub fn base_controller(&self) -> &Arc<ControllerDef> {
        &self.base
    }

    /// The application's built-in filter instances.
    pub fn builtins(&self) -> &BuiltinFilters {
        &self.builtins
    }

    pub fn controller(mut self, controller: Arc<ControllerDef>) -> Self {
        self.controllers.push(controller);
        self
    }

    pub fn controllers(mut self, controllers: impl IntoIterator<Item = Arc<ControllerDef>>) -> Self {
        self.controllers.extend(controllers);
        self
    }

    /// Attaches a filter to every controller, after inherited ones.
    pub fn default_filter(mut self, attachment: FilterAttachment) -> Self {
        self.default_filters.push(attachment);
        self
    }

    pub fn hooks(mut self, hooks: impl AppHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Overrides the tracer; without one, `tracing.enabled` selects [`SpanTracer`].
    pub fn tracer(mut self, tracer: BoxedTracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Overrides the renderer built from the `render` section.
    pub fn renderer(mut self, renderer: BoxedRenderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn file_sender(mut self, sender: BoxedFileSender) -> Self {
        self.file_sender = Some(sender);
        self
    }

    /// Runs `on_pre_init`, registers controllers and filters, then runs
    /// `on_post_init`.
    ///
    /// Unless `errors.disable_uncaught_handler` is set, panics outside any
    /// request are reported from here on.
    ///
    /// # Errors
    ///
    /// A failing hook or any [`StructuralError`](perch_core::StructuralError)
    /// aborts startup; nothing stays registered.
    pub async fn init(self) -> RuntimeResult<ReadyApp> {
        self.hooks
            .on_pre_init(&self.config)
            .await
            .map_err(|source| RuntimeError::Hook {
                hook: "on_pre_init",
                source,
            })?;

        let responder = self.build_responder();
        let registry = ControllerRegistry::register(
            &self.base,
            self.controllers,
            self.default_filters,
        )?;
        info!(controllers = registry.len(), "Controllers registered");

        if self.config.errors.uncaught_handler_enabled() {
            panic::install(Arc::clone(&self.reporter));
        }

        let dispatcher = Dispatcher::new(registry, responder, dispatch_options(&self.config));
        let mut entry = AppEntry::new(
            dispatcher,
            self.reporter,
            Arc::clone(&self.hooks),
            EntryOptions::from_config(&self.config),
        );
        match self.tracer {
            Some(tracer) => entry = entry.tracer(tracer),
            None if self.config.tracing.enabled => entry = entry.tracer(Arc::new(SpanTracer)),
            None => {}
        }

        self.hooks
            .on_post_init(&self.config)
            .await
            .map_err(|source| RuntimeError::Hook {
                hook: "on_post_init",
                source,
            })?;

        let router = router(
            Arc::new(entry),
            RequestOptions {
                body_limit: self.config.body.limit_bytes,
            },
        );
        Ok(ReadyApp {
            config: self.config,
            router,
            hooks: self.hooks,
        })
    }

    /// Initializes, then serves until Ctrl+C or SIGTERM.
    pub async fn run(self) -> RuntimeResult<()> {
        self.init().await?.run().await
    }

    fn build_responder(&self) -> Responder {
        let mut responder = Responder::new(self.config.app.version.clone())
            .messages(self.config.app.error_messages());

        let file_sender = self.file_sender.clone().unwrap_or_else(|| {
            Arc::new(match &self.config.files.root {
                Some(root) => FsFileSender::with_root(root),
                None => FsFileSender::new(),
            })
        });
        responder = responder.file_sender(file_sender);

        if let Some(renderer) = self.renderer.clone().or_else(|| self.configured_renderer()) {
            responder = responder.renderer(renderer);
        }
        responder
    }

    #[cfg(feature = "templates")]
    fn configured_renderer(&self) -> Option<BoxedRenderer> {
        let render = self.config.render.as_ref()?;
        info!(dir = %render.dir.display(), extension = %render.extension, "View rendering enabled");
        Some(Arc::new(perch_transport::MiniJinjaRenderer::from_dir(
            &render.dir,
            render.extension.clone(),
        )))
    }

    #[cfg(not(feature = "templates"))]
    fn configured_renderer(&self) -> Option<BoxedRenderer> {
        if self.config.render.is_some() {
            warn!("`render` is configured but the `templates` feature is disabled");
        }
        None
    }
}

impl Default for PerchApp {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch_options(config: &PerchConfig) -> DispatchOptions {
    DispatchOptions {
        default_controller: config.routing.default_controller.clone(),
        default_action: config.routing.default_action.clone(),
        form_request_key: config.routing.form_request_key.clone(),
        controller_defaults: Arc::new(config.app.controller_defaults.clone()),
        timestamps: !config.app.disable_default_timestamp,
    }
}

// =============================================================================
// ReadyApp
// =============================================================================

/// A registered application, ready to serve.
pub struct ReadyApp {
    config: PerchConfig,
    router: Router,
    hooks: Arc<dyn AppHooks>,
}

impl ReadyApp {
    pub fn config(&self) -> &PerchConfig {
        &self.config
    }

    /// The axum router serving the application, e.g. for in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serves until Ctrl+C or SIGTERM.
    pub async fn run(self) -> RuntimeResult<()> {
        info!("Perch is now running. Press Ctrl+C to stop.");
        self.run_until(wait_for_shutdown()).await
    }

    /// Serves until `shutdown` completes, then runs `on_end`.
    pub async fn run_until<F>(self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let server = HttpServer::bind(&self.config.server.bind_addr()).await?;
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            shutdown.await;
            trigger.cancel();
        });

        let result = server.serve(self.router, token).await;
        self.hooks.on_end().await;
        result.map_err(RuntimeError::from)
    }
}

impl std::fmt::Debug for ReadyApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyApp")
            .field("addr", &self.config.server.bind_addr())
            .field("version", &self.config.app.version)
            .finish_non_exhaustive()
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// AppBuilder
// =============================================================================

/// Builds a [`PerchApp`] with custom configuration loading.
pub struct AppBuilder {
    loader: ConfigLoader,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            loader: ConfigLoader::new().with_current_dir(),
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.loader = self.loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.loader = self.loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.loader = self.loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.loader = self.loader.without_env();
        self
    }

    /// Replaces the built-in defaults.
    pub fn merge(mut self, config: PerchConfig) -> Self {
        self.loader = self.loader.merge(config);
        self
    }

    /// Overrides one dotted key above every other source.
    pub fn set<T: serde::Serialize>(mut self, key: &str, value: T) -> Self {
        self.loader = self.loader.set(key, value);
        self
    }

    pub fn build(self) -> ConfigResult<PerchApp> {
        Ok(PerchApp::from_config(self.loader.load()?))
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}
