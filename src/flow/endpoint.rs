//! Endpoint descriptors consumed by the flow.
//!
//! # Design Decisions
//! - URL matching is path-only: exact or prefix, first endpoint wins
//! - No regex in the hot path
//! - Handlers receive the raw body and interpret it themselves

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::http::{Method, StatusCode, Uri};
use axum::BoxError;
use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;

use super::{Content, ContextCheck, ContextOperations, HeaderInput};

/// Trait for matching request paths against an endpoint.
pub trait UrlMatcher: Send + Sync + fmt::Debug {
    fn matches(&self, path: &str) -> bool;
}

/// Matches one path exactly.
#[derive(Debug, Clone)]
pub struct ExactPath {
    path: String,
}

impl ExactPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl UrlMatcher for ExactPath {
    fn matches(&self, path: &str) -> bool {
        path == self.path
    }
}

/// Matches every path under a prefix.
#[derive(Debug, Clone)]
pub struct PathPrefix {
    prefix: String,
}

impl PathPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl UrlMatcher for PathPrefix {
    fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }
}

/// Everything a handler gets to see about the request.
pub struct HandlerInput<S, B> {
    pub method: Method,
    pub url: Uri,
    pub content_type: Option<String>,
    pub state: Option<S>,
    /// Unparsed; `None` when the stack had no streaming body to give.
    pub body: Option<B>,
}

/// What a handler wants written back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    /// Defaults to 200 with content, 204 without.
    pub status: Option<StatusCode>,
    pub content_type: String,
    pub output: Option<Content>,
    pub headers: Vec<(String, HeaderInput)>,
}

impl HandlerOutput {
    pub const JSON: &'static str = "application/json";

    pub fn no_content() -> Self {
        Self::default()
    }

    pub fn content(content_type: impl Into<String>, output: impl Into<Content>) -> Self {
        Self {
            content_type: content_type.into(),
            output: Some(output.into()),
            ..Self::default()
        }
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::content(Self::JSON, serde_json::to_string(value)?))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<HeaderInput>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }
}

type HandlerFn<S, B> =
    dyn Fn(HandlerInput<S, B>) -> BoxFuture<'static, Result<HandlerOutput, BoxError>> + Send + Sync;

/// One method's worth of behaviour on an endpoint.
pub struct EndpointHandler<O: ContextOperations> {
    state_info: O::StateInfo,
    context_validator: Option<Arc<dyn ContextCheck<O::Context>>>,
    handler: Arc<HandlerFn<O::State, O::RequestBody>>,
}

impl<O: ContextOperations> EndpointHandler<O> {
    pub fn new<F, Fut>(state_info: O::StateInfo, handler: F) -> Self
    where
        F: Fn(HandlerInput<O::State, O::RequestBody>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerOutput, BoxError>> + Send + 'static,
    {
        Self {
            state_info,
            context_validator: None,
            handler: Arc::new(move |input: HandlerInput<O::State, O::RequestBody>| {
                handler(input).boxed()
            }),
        }
    }

    pub fn with_context_validator<V>(mut self, validator: V) -> Self
    where
        V: ContextCheck<O::Context> + 'static,
    {
        self.context_validator = Some(Arc::new(validator));
        self
    }

    pub fn state_info(&self) -> &O::StateInfo {
        &self.state_info
    }

    pub fn context_validator(&self) -> Option<&dyn ContextCheck<O::Context>> {
        self.context_validator.as_deref()
    }

    pub(crate) fn invoke(
        &self,
        input: HandlerInput<O::State, O::RequestBody>,
    ) -> BoxFuture<'static, Result<HandlerOutput, BoxError>> {
        (self.handler)(input)
    }
}

/// A URL matcher plus per-method handlers.
pub struct AppEndpoint<O: ContextOperations> {
    matcher: Box<dyn UrlMatcher>,
    handlers: Vec<(Method, EndpointHandler<O>)>,
}

impl<O: ContextOperations> AppEndpoint<O> {
    pub fn new(matcher: impl UrlMatcher + 'static) -> Self {
        Self {
            matcher: Box::new(matcher),
            handlers: Vec::new(),
        }
    }

    pub fn exact(path: impl Into<String>) -> Self {
        Self::new(ExactPath::new(path))
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::new(PathPrefix::new(prefix))
    }

    /// Register `handler` for `method`, replacing any earlier one.
    pub fn with_handler(mut self, method: Method, handler: EndpointHandler<O>) -> Self {
        self.handlers.retain(|(m, _)| *m != method);
        self.handlers.push((method, handler));
        self
    }

    pub fn matches(&self, path: &str) -> bool {
        self.matcher.matches(path)
    }

    pub fn handler_for(&self, method: &Method) -> Option<&EndpointHandler<O>> {
        self.handlers
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, handler)| handler)
    }

    pub fn allowed_methods(&self) -> Vec<Method> {
        self.handlers.iter().map(|(m, _)| m.clone()).collect()
    }
}

impl<O: ContextOperations> fmt::Debug for AppEndpoint<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppEndpoint")
            .field("matcher", &self.matcher)
            .field("methods", &self.allowed_methods())
            .finish()
    }
}
