//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{AppConfig, LogOutput, LoggingConfig, PerchConfig, RoutingConfig, ServerConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &PerchConfig) -> ConfigResult<()> {
    validate_server(&config.server)?;
    validate_routing(&config.routing)?;
    validate_app(&config.app)?;
    validate_logging(&config.logging)?;

    if config.body.limit_bytes == 0 {
        return Err(ConfigError::validation(
            "Body limit must be greater than 0",
        ));
    }

    if let Some(render) = &config.render
        && render.extension.trim_start_matches('.').is_empty()
    {
        return Err(ConfigError::missing_field("render.extension"));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> ConfigResult<()> {
    if server.host.is_empty() {
        return Err(ConfigError::missing_field("server.host"));
    }

    if let Some(prefix) = &server.prefix
        && !prefix.starts_with('/')
    {
        return Err(ConfigError::validation(format!(
            "Route prefix must start with '/': {prefix}"
        )));
    }

    Ok(())
}

fn validate_routing(routing: &RoutingConfig) -> ConfigResult<()> {
    for (field, value) in [
        ("routing.default_controller", &routing.default_controller),
        ("routing.default_action", &routing.default_action),
        ("routing.form_request_key", &routing.form_request_key),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::missing_field(field));
        }
    }

    if routing.default_controller.contains('/') || routing.default_action.contains('/') {
        return Err(ConfigError::validation(
            "Default controller and action cannot contain '/'",
        ));
    }

    Ok(())
}

fn validate_app(app: &AppConfig) -> ConfigResult<()> {
    for code in app.json_error_messages.keys() {
        match code.trim().parse::<i64>() {
            Ok(0) => {
                return Err(ConfigError::validation(
                    "The success code 0 cannot carry an error message",
                ));
            }
            Ok(_) => {}
            Err(_) => {
                return Err(ConfigError::validation(format!(
                    "JSON error code must be an integer: {code}"
                )));
            }
        }
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::schema::RenderConfig;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&PerchConfig::default()).is_ok());
    }

    #[test]
    fn prefix_must_be_absolute() {
        let mut config = PerchConfig::default();
        config.server.prefix = Some("api".into());
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));

        config.server.prefix = Some("/api".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_routing_keys_are_rejected() {
        let mut config = PerchConfig::default();
        config.routing.default_action = " ".into();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { field }) if field == "routing.default_action"
        ));
    }

    #[test]
    fn zero_body_limit_is_rejected() {
        let mut config = PerchConfig::default();
        config.body.limit_bytes = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn render_needs_an_extension() {
        let mut config = PerchConfig::default();
        config.render = Some(RenderConfig {
            extension: ".".into(),
            ..Default::default()
        });
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn error_message_codes_must_be_non_zero_integers() {
        let mut config = PerchConfig::default();
        config.app.json_error_messages = HashMap::from([("x".into(), "bad".into())]);
        assert!(validate_config(&config).is_err());

        config.app.json_error_messages = HashMap::from([("0".into(), "ok?".into())]);
        assert!(validate_config(&config).is_err());

        config.app.json_error_messages = HashMap::from([("-1".into(), "failed".into())]);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn file_logging_needs_a_path() {
        let mut config = PerchConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());
    }
}
