//! Configuration schema definitions.
//!
//! Every section has defaults, so an empty file is a valid config.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::http::{
    BuildError, Endpoint, HttpVersion, RouteOptions, ServerCreationOptions, ServerOptions,
};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub listener: ListenerConfig,
    pub server: ServerConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// 1 or 2.
    pub http_version: u8,

    /// Unset means "decide from the TLS keys in `options`".
    pub secure: Option<bool>,

    pub request_timeout_secs: Option<u64>,

    pub body_limit_bytes: Option<usize>,

    /// Passed through to the transport; see `http::options`.
    pub options: toml::Table,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_version: 1,
            secure: None,
            request_timeout_secs: None,
            body_limit_bytes: None,
            options: toml::Table::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or `EnvFilter` directive, e.g. "info" or "flowgate=debug".
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn http_version(&self) -> Result<HttpVersion, BuildError> {
        HttpVersion::try_from(self.server.http_version)
    }

    pub fn route_options(&self) -> RouteOptions {
        RouteOptions {
            request_timeout: self.server.request_timeout_secs.map(Duration::from_secs),
            body_limit: self.server.body_limit_bytes,
            ..RouteOptions::default()
        }
    }

    /// Server creation options for `endpoints`, minus state and events.
    pub fn creation_options<S, I>(
        &self,
        endpoints: Vec<Endpoint<S, I>>,
    ) -> Result<ServerCreationOptions<S, I>, BuildError>
    where
        S: Send + 'static,
        I: Send + Sync + 'static,
    {
        let mut creation = ServerCreationOptions::new(endpoints)
            .with_http_version(self.http_version()?)
            .with_options(ServerOptions::from_table(self.server.options.clone()))
            .with_route_options(self.route_options());
        creation.secure = self.server.secure;
        Ok(creation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.http_version().unwrap(), HttpVersion::Http1);
    }

    #[test]
    fn route_options_follow_server_section() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            request_timeout_secs = 5
            body_limit_bytes = 1024
            "#,
        )
        .unwrap();

        let route = config.route_options();
        assert_eq!(route.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(route.body_limit, Some(1024));
        assert!(route.request_id);
    }

    #[test]
    fn creation_options_carry_version_security_and_options() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            http_version = 2
            secure = false

            [server.options]
            cert = "cert.pem"
            "#,
        )
        .unwrap();

        let creation = config.creation_options::<String, ()>(Vec::new()).unwrap();
        assert_eq!(creation.http_version, Some(HttpVersion::Http2));
        assert_eq!(creation.secure, Some(false));
        assert_eq!(creation.options.get_str("cert"), Some("cert.pem"));
    }
}
