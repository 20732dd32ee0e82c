//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection (net)
//!     → server.rs (shape resolution, hyper builder per shape)
//!     → registrar.rs (catch-all route, tower-http layers)
//!     → context.rs (request head + raw body + response handle)
//!     → adapter.rs (ContextOperations over the context)
//!     → flow::TypicalServerFlow
//!     → Send to client
//! ```

pub mod adapter;
pub mod context;
pub mod options;
pub mod registrar;
pub mod server;
pub mod validator;

use crate::flow::AppEndpoint;

pub use adapter::{initial_state, state_factory, AxumOperations, CreateState};
pub use context::{Context, ResponseHandle};
pub use options::ServerOptions;
pub use registrar::{register, FlowHandler, RouteOptions, SUPPORTED_METHODS};
pub use server::{
    create_server, BuildError, HttpVersion, ListenError, RunningServer, Security, ServerBuilder,
    ServerCreationOptions, ServerHandle, ServerShape,
};
pub use validator::{validate_context_state, ContextValidator, ProtocolErrorInfo, Validated};

/// Endpoint served by the axum stack.
pub type Endpoint<S, I = ()> = AppEndpoint<AxumOperations<S, I>>;
