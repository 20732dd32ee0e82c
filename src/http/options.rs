//! Free-form server option bag.
//!
//! Options are passed through to the transport layer as a TOML table.
//! Only a handful of keys are honoured; the rest are kept so the security
//! heuristic can still see them.

use serde::{Deserialize, Serialize};

/// Certificate chain: a PEM file path or inline PEM text.
pub const CERT: &str = "cert";
/// Private key: a PEM file path or inline PEM text.
pub const KEY: &str = "key";
/// HTTP/2 over TLS only: also negotiate `http/1.1`. Plain HTTP/2 also accepts HTTP/1.
pub const ALLOW_HTTP1: &str = "allow_http1";
pub const MAX_CONNECTIONS: &str = "max_connections";
pub const KEEP_ALIVE: &str = "keep_alive";
pub const MAX_CONCURRENT_STREAMS: &str = "max_concurrent_streams";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerOptions(toml::Table);

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_table(table: toml::Table) -> Self {
        Self(table)
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<toml::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(toml::Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(toml::Value::as_bool)
    }

    /// Non-negative integers only.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0
            .get(key)
            .and_then(toml::Value::as_integer)
            .and_then(|value| u64::try_from(value).ok())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_table(&self) -> &toml::Table {
        &self.0
    }
}

impl From<toml::Table> for ServerOptions {
    fn from(table: toml::Table) -> Self {
        Self(table)
    }
}
