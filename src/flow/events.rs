//! Server events reported to an optional observer.

use std::sync::Arc;

use axum::http::{Method, StatusCode, Uri};

use super::validation::ValidationFailure;

/// Callback observing what happened to each request.
pub type EventObserver = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// No endpoint serves the URL.
    InvalidUrl { method: Method, url: Uri },
    /// The endpoint exists but not for this method.
    InvalidMethod {
        method: Method,
        url: Uri,
        allowed: Vec<Method>,
    },
    /// The context validator rejected the request.
    InvalidContext {
        method: Method,
        url: Uri,
        failure: ValidationFailure,
    },
    SuccessfulInvocationStart { method: Method, url: Uri },
    SuccessfulInvocationEnd {
        method: Method,
        url: Uri,
        status: StatusCode,
    },
    /// The flow failed or panicked. `error` never reaches the client.
    Exception {
        method: Method,
        url: Uri,
        error: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::InvalidUrl { .. } => "invalid_url",
            ServerEvent::InvalidMethod { .. } => "invalid_method",
            ServerEvent::InvalidContext { .. } => "invalid_context",
            ServerEvent::SuccessfulInvocationStart { .. } => "successful_invocation_start",
            ServerEvent::SuccessfulInvocationEnd { .. } => "successful_invocation_end",
            ServerEvent::Exception { .. } => "exception",
        }
    }
}

/// Build the event lazily; nothing is allocated without an observer.
pub(crate) fn emit(observer: Option<&EventObserver>, event: impl FnOnce() -> ServerEvent) {
    if let Some(observer) = observer {
        let event = event();
        tracing::trace!(event = event.name(), "Server event");
        observer(&event);
    }
}
