//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;

use perch_core::JsonCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerchConfig {
    /// Listener and transport-level policy.
    pub server: ServerConfig,

    /// Route defaults.
    pub routing: RoutingConfig,

    /// Application-wide settings handed to the pipeline.
    pub app: AppConfig,

    /// Switches for the built-in error handlers.
    pub errors: ErrorHandlingConfig,

    /// Per-request tracing spans.
    pub tracing: TracingConfig,

    /// Server-side view rendering; disabled when absent.
    pub render: Option<RenderConfig>,

    /// File delivery.
    pub files: FilesConfig,

    /// Request body decoding.
    pub body: BodyConfig,

    /// Logging output.
    pub logging: LoggingConfig,
}

// =============================================================================
// Server
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,

    /// Port to listen on; `0` picks an ephemeral port.
    pub port: u16,

    /// Path prefix every route lives under, e.g. `/api`.
    pub prefix: Option<String>,

    /// Serve plain-http requests instead of answering them 404.
    pub allow_http: bool,

    /// Local test mode; implies `allow_http`.
    pub local_test: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            prefix: None,
            allow_http: false,
            local_test: false,
        }
    }
}

impl ServerConfig {
    /// `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn accepts_http(&self) -> bool {
        self.allow_http || self.local_test
    }
}

// =============================================================================
// Routing
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub default_controller: String,
    pub default_action: String,
    /// Body field carrying a JSON-encoded form payload.
    pub form_request_key: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_controller: "index".to_string(),
            default_action: "index".to_string(),
            form_request_key: "formRequest".to_string(),
        }
    }
}

// =============================================================================
// App
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Stamped into every JSON response body.
    pub version: String,

    /// Default configuration handed to every controller instance.
    pub controller_defaults: Value,

    /// Default `msg` per non-success JSON code, keyed by the code as text.
    pub json_error_messages: HashMap<String, String>,

    /// Skip the `request_entry_begin`/`request_entry_end` reports.
    pub disable_default_log: bool,

    /// Skip recording pipeline stamps.
    pub disable_default_timestamp: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: "0.0.0".to_string(),
            controller_defaults: Value::Null,
            json_error_messages: HashMap::new(),
            disable_default_log: false,
            disable_default_timestamp: false,
        }
    }
}

impl AppConfig {
    /// The configured error messages with parsed codes. Keys that are not
    /// integers are skipped; validation rejects them up front.
    pub fn error_messages(&self) -> HashMap<JsonCode, String> {
        self.json_error_messages
            .iter()
            .filter_map(|(code, msg)| Some((JsonCode(code.trim().parse().ok()?), msg.clone())))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandlingConfig {
    /// Disables every built-in handler.
    pub disable_all: bool,
    /// Disables the per-request error handler.
    pub disable_request_handler: bool,
    /// Disables the handler for panics escaping a request.
    pub disable_app_handler: bool,
    /// Disables reporting of panics outside any request.
    pub disable_uncaught_handler: bool,
}

impl ErrorHandlingConfig {
    pub fn request_handler_enabled(&self) -> bool {
        !(self.disable_all || self.disable_request_handler)
    }

    pub fn app_handler_enabled(&self) -> bool {
        !(self.disable_all || self.disable_app_handler)
    }

    pub fn uncaught_handler_enabled(&self) -> bool {
        !(self.disable_all || self.disable_uncaught_handler)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    /// Request paths that never get a span; compared trimmed and lowercase.
    pub path_ignore: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Template directory.
    pub dir: PathBuf,
    /// Extension appended to view names.
    pub extension: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("views"),
            extension: "html".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Root that relative file paths resolve against.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Maximum request body size in bytes.
    pub limit_bytes: usize,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            limit_bytes: perch_transport::DEFAULT_BODY_LIMIT,
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `Full` without it.
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// How often file output starts a new file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Span lifecycle events to log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Log file for [`LogOutput::File`].
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    pub thread_ids: bool,
    /// Include file and line of each event.
    pub file_location: bool,
    /// Per-module levels, e.g. `perch_framework = "debug"`.
    pub filters: HashMap<String, LogLevel>,
    pub span_events: SpanEventConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = PerchConfig::default();
        assert_eq!(config.server.bind_addr(), "0.0.0.0:3000");
        assert!(!config.server.accepts_http());
        assert_eq!(config.routing.default_controller, "index");
        assert_eq!(config.routing.form_request_key, "formRequest");
        assert!(config.errors.request_handler_enabled());
        assert!(config.render.is_none());
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn error_messages_parse_codes() {
        let app = AppConfig {
            json_error_messages: HashMap::from([
                ("-2".to_string(), "login first".to_string()),
                ("oops".to_string(), "ignored".to_string()),
            ]),
            ..Default::default()
        };
        let messages = app.error_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[&JsonCode(-2)], "login first");
    }

    #[test]
    fn disable_all_wins_over_individual_switches() {
        let errors = ErrorHandlingConfig {
            disable_all: true,
            ..Default::default()
        };
        assert!(!errors.request_handler_enabled());
        assert!(!errors.app_handler_enabled());
        assert!(!errors.uncaught_handler_enabled());
    }

    #[test]
    fn uncaught_handler_has_its_own_switch() {
        assert!(ErrorHandlingConfig::default().uncaught_handler_enabled());

        let errors = ErrorHandlingConfig {
            disable_uncaught_handler: true,
            ..Default::default()
        };
        assert!(!errors.uncaught_handler_enabled());
        assert!(errors.app_handler_enabled());
    }
}
