//! Configuration module for the Perch runtime.
//!
//! Layered loading (defaults, files, environment) lives in [`loader`], the
//! schema in [`schema`] and the consistency checks in [`validation`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    AppConfig, BodyConfig, ErrorHandlingConfig, FilesConfig, LogFormat, LogLevel, LogOutput,
    LogRotation, LoggingConfig, PerchConfig, RenderConfig, RoutingConfig, ServerConfig,
    SpanEventConfig, TracingConfig,
};
pub use validation::validate_config;
