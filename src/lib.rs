//! Flowgate: a generic request flow served over axum and hyper.
//!
//! Endpoints, state creation, and validation are declared once against
//! [`flow::ContextOperations`]; the `http` subsystem runs them behind a
//! catch-all route on HTTP/1 or HTTP/2, with or without TLS.

pub mod config;
pub mod flow;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod state;

pub use config::AppConfig;
pub use http::{create_server, Endpoint, ServerCreationOptions, ServerHandle};
pub use lifecycle::Shutdown;
