//! Configuration validation.
//!
//! Serde handles syntax; this module checks values. All problems are
//! reported at once, not just the first.

use crate::config::schema::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.host.trim().is_empty() {
        errors.push(ValidationError::new("listener.host", "must not be empty"));
    }

    if !matches!(config.server.http_version, 1 | 2) {
        errors.push(ValidationError::new(
            "server.http_version",
            format!("must be 1 or 2, got {}", config.server.http_version),
        ));
    }

    if config.server.request_timeout_secs == Some(0) {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be positive"));
    }

    if config.server.body_limit_bytes == Some(0) {
        errors.push(ValidationError::new("server.body_limit_bytes", "must be positive"));
    }

    if config.observability.log_level.trim().is_empty() {
        errors.push(ValidationError::new("observability.log_level", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&AppConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = AppConfig::default();
        config.listener.host = " ".to_string();
        config.server.http_version = 3;
        config.server.request_timeout_secs = Some(0);
        config.server.body_limit_bytes = Some(0);

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.host",
                "server.http_version",
                "server.request_timeout_secs",
                "server.body_limit_bytes",
            ]
        );
        assert_eq!(errors[1].to_string(), "server.http_version: must be 1 or 2, got 3");
    }
}
