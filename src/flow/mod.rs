//! Generic server-flow subsystem.
//!
//! The flow knows nothing about axum or hyper. It talks to the concrete
//! stack only through [`ContextOperations`], and decides which endpoint
//! handles a request, which status to answer with, and what to write.
//!
//! # Data Flow
//! ```text
//! catch-all route (http::registrar)
//!     → ServerFlow::serve(ctx, ops)
//!         → ops.get_url / get_method      (endpoint + handler lookup)
//!         → ops.get_state(ctx, info)      (state factory)
//!         → ContextCheck::check(ctx)      (context validator, optional)
//!         → ops.get_request_body(ctx)     (raw body to handler)
//!         → handler(input).await
//!         → ops.set_header / set_status_code / send_content
//! ```
//!
//! # Design Decisions
//! - Validation failures are values, not errors
//! - Only truly exceptional conditions surface as [`FlowError`]
//! - Writes go through the operations record; the flow never owns the response

pub mod endpoint;
pub mod events;
pub mod typical;
pub mod validation;

use axum::body::Bytes;
use axum::http::{HeaderValue, Method, StatusCode, Uri};
use axum::BoxError;
use futures_util::future::BoxFuture;

use crate::state::StateError;

pub use endpoint::{
    AppEndpoint, EndpointHandler, ExactPath, HandlerInput, HandlerOutput, PathPrefix, UrlMatcher,
};
pub use events::{EventObserver, ServerEvent};
pub use typical::TypicalServerFlow;
pub use validation::{DataValidationError, ProtocolError, ValidationFailure, ValidationResult};

/// Value written by [`ContextOperations::set_header`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderInput {
    Text(String),
    Number(u64),
    /// Written as repeated header lines, in order.
    List(Vec<String>),
}

impl From<&str> for HeaderInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for HeaderInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<u64> for HeaderInput {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

impl From<Vec<String>> for HeaderInput {
    fn from(values: Vec<String>) -> Self {
        Self::List(values)
    }
}

impl From<Vec<&str>> for HeaderInput {
    fn from(values: Vec<&str>) -> Self {
        Self::List(values.into_iter().map(str::to_string).collect())
    }
}

/// Final response body handed to [`ContextOperations::send_content`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Encoded as UTF-8.
    Text(String),
    Binary(Bytes),
}

impl Content {
    pub fn empty() -> Self {
        Self::Binary(Bytes::new())
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Binary(bytes) => bytes,
        }
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Bytes> for Content {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

impl From<Vec<u8>> for Content {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(value))
    }
}

/// Failure to write to the response held by a context.
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    /// The body was already sent; headers and status are frozen.
    #[error("response already finalized")]
    Finalized,
    #[error("invalid header name `{0}`")]
    InvalidHeaderName(String),
    #[error("invalid value for header `{0}`")]
    InvalidHeaderValue(String),
    #[error("failed to build response: {0}")]
    Build(#[from] axum::http::Error),
}

/// Exceptional outcome of a flow run. Turned into a 500 by the caller.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("state factory failed: {0}")]
    State(#[source] BoxError),
    #[error(transparent)]
    AttachedState(#[from] StateError),
    #[error("endpoint handler failed: {0}")]
    Handler(#[source] BoxError),
    #[error(transparent)]
    Response(#[from] ResponseError),
}

/// The fixed operation set a flow needs from the concrete server stack.
pub trait ContextOperations: Send + Sync + 'static {
    type Context: Send + 'static;
    type State: Send + 'static;
    type StateInfo: Send + Sync + 'static;
    type RequestBody: Send + 'static;

    fn get_url<'c>(&self, ctx: &'c Self::Context) -> &'c Uri;

    fn get_method<'c>(&self, ctx: &'c Self::Context) -> &'c Method;

    fn get_header<'c>(&self, ctx: &'c Self::Context, name: &str) -> Option<&'c HeaderValue>;

    /// The raw body, if it is still available in streaming form.
    fn get_request_body(&self, ctx: &mut Self::Context) -> Option<Self::RequestBody>;

    fn get_state(
        &self,
        ctx: &mut Self::Context,
        state_info: &Self::StateInfo,
    ) -> Result<Option<Self::State>, BoxError>;

    fn set_header(
        &self,
        ctx: &mut Self::Context,
        name: &str,
        value: HeaderInput,
    ) -> Result<(), ResponseError>;

    fn set_status_code(&self, ctx: &mut Self::Context, status: StatusCode) -> Result<(), ResponseError>;

    /// Write the body and finalise the response.
    fn send_content(&self, ctx: &mut Self::Context, content: Content) -> Result<(), ResponseError>;
}

/// A framework-agnostic request dispatcher.
pub trait ServerFlow<O: ContextOperations>: Send + Sync + 'static {
    fn serve<'a>(
        &'a self,
        ctx: &'a mut O::Context,
        ops: &'a O,
    ) -> BoxFuture<'a, Result<(), FlowError>>;
}

/// Endpoint-level check run against the whole context before the handler.
pub trait ContextCheck<C>: Send + Sync {
    fn check(&self, ctx: &mut C) -> Result<ValidationResult<()>, StateError>;
}
