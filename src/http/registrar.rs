//! Catch-all route registration.
//!
//! # Responsibilities
//! - Install one route for every supported method and every path
//! - Keep the body raw: no extractor, no default body limit
//! - Turn flow failures and panics into an opaque 500
//!
//! # Design Decisions
//! - URL and method dispatch belong to the flow, not to axum's router
//! - Failure detail goes to logs and the event observer, never to the client

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{on, MethodFilter},
    Router,
};
use futures_util::FutureExt;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::context::Context;
use crate::flow::events::emit;
use crate::flow::{ContextOperations, EventObserver, ServerEvent, ServerFlow};

/// Every method the catch-all route answers. Anything else gets axum's 405.
pub const SUPPORTED_METHODS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::OPTIONS,
    Method::HEAD,
    Method::DELETE,
];

fn supported_methods_filter() -> MethodFilter {
    MethodFilter::GET
        .or(MethodFilter::POST)
        .or(MethodFilter::PUT)
        .or(MethodFilter::PATCH)
        .or(MethodFilter::OPTIONS)
        .or(MethodFilter::HEAD)
        .or(MethodFilter::DELETE)
}

/// Extra behaviour wrapped around the catch-all route.
#[derive(Debug, Clone)]
pub struct RouteOptions {
    /// Answer 408 when a request takes longer than this.
    pub request_timeout: Option<Duration>,
    /// Reject bodies larger than this many bytes with 413.
    pub body_limit: Option<usize>,
    /// Generate and echo `x-request-id`.
    pub request_id: bool,
    /// Wrap each request in a tracing span.
    pub trace: bool,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            request_timeout: None,
            body_limit: None,
            request_id: true,
            trace: true,
        }
    }
}

impl RouteOptions {
    #[allow(deprecated)]
    fn apply(&self, mut router: Router) -> Router {
        if let Some(limit) = self.body_limit {
            router = router.layer(RequestBodyLimitLayer::new(limit));
        }
        if let Some(timeout) = self.request_timeout {
            router = router.layer(TimeoutLayer::new(timeout));
        }
        if self.request_id {
            router = router
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));
        }
        if self.trace {
            router = router.layer(TraceLayer::new_for_http());
        }
        router
    }
}

/// Runs the flow for one request and produces the final response.
pub struct FlowHandler<F, O> {
    flow: Arc<F>,
    ops: Arc<O>,
    events: Option<EventObserver>,
}

impl<F, O> Clone for FlowHandler<F, O> {
    fn clone(&self) -> Self {
        Self {
            flow: Arc::clone(&self.flow),
            ops: Arc::clone(&self.ops),
            events: self.events.clone(),
        }
    }
}

impl<F, O> fmt::Debug for FlowHandler<F, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowHandler")
            .field("events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

impl<F, O> FlowHandler<F, O>
where
    O: ContextOperations<Context = Context>,
    F: ServerFlow<O>,
{
    pub fn new(flow: F, ops: O, events: Option<EventObserver>) -> Self {
        Self {
            flow: Arc::new(flow),
            ops: Arc::new(ops),
            events,
        }
    }

    /// Never fails: anything the flow could not answer becomes a 500.
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let method = request.method().clone();
        let url = request.uri().clone();
        let mut ctx = Context::new(request);

        let outcome = AssertUnwindSafe(self.flow.serve(&mut ctx, &self.ops))
            .catch_unwind()
            .await;

        let (error, sent) = match outcome {
            Ok(Ok(())) => match ctx.into_response().into_response() {
                Ok(response) => return response,
                Err(e) => (e.to_string(), None),
            },
            Ok(Err(e)) => (e.to_string(), ctx.into_response().into_sent()),
            Err(panic) => (panic_message(panic.as_ref()), None),
        };

        tracing::error!(%method, %url, error = %error, "Request flow failed");
        emit(self.events.as_ref(), || ServerEvent::Exception { method, url, error });

        // A response that already went out stays as sent.
        sent.unwrap_or_else(|| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic".to_string()
    }
}

/// Route every supported method on every path of `router` to `handler`.
///
/// Panics if `router` already has a route for `/` or `/{*path}`.
pub fn register<F, O>(router: Router, handler: FlowHandler<F, O>, options: &RouteOptions) -> Router
where
    O: ContextOperations<Context = Context>,
    F: ServerFlow<O>,
{
    let route = on(supported_methods_filter(), move |request: Request<Body>| {
        let handler = handler.clone();
        async move { handler.handle(request).await }
    });

    let router = router
        .route("/", route.clone())
        .route("/{*path}", route)
        .layer(DefaultBodyLimit::disable());
    options.apply(router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{AppEndpoint, EndpointHandler, HandlerInput, HandlerOutput, TypicalServerFlow};
    use crate::http::adapter::{initial_state, state_factory, AxumOperations, CreateState};
    use axum::body::Bytes;
    use axum::http::request::Parts;
    use axum::BoxError;
    use std::sync::Mutex;
    use tower::ServiceExt;

    type Ops = AxumOperations<String, ()>;

    fn echo_body() -> EndpointHandler<Ops> {
        EndpointHandler::new((), |input: HandlerInput<String, Body>| async move {
            let body = match input.body {
                Some(body) => axum::body::to_bytes(body, usize::MAX).await?,
                None => Bytes::new(),
            };
            let content_type = input.content_type.unwrap_or_default();
            Ok::<_, BoxError>(HandlerOutput::content(content_type, body))
        })
    }

    fn echo_state() -> EndpointHandler<Ops> {
        EndpointHandler::new((), |input: HandlerInput<String, Body>| async move {
            Ok::<_, BoxError>(HandlerOutput::json(&input.state)?)
        })
    }

    fn router_with(
        endpoints: Vec<AppEndpoint<Ops>>,
        create_state: CreateState<String, ()>,
        events: Option<EventObserver>,
    ) -> Router {
        let flow = TypicalServerFlow::new(endpoints, events.clone());
        let handler = FlowHandler::new(flow, AxumOperations::new(Some(create_state)), events);
        register(Router::new(), handler, &RouteOptions::default())
    }

    fn router() -> Router {
        router_with(
            vec![AppEndpoint::exact("/path")
                .with_handler(Method::GET, echo_state())
                .with_handler(Method::POST, echo_body())],
            initial_state("State".to_string()),
            None,
        )
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_of(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn unmatched_paths_reach_the_flow_and_get_404() {
        for uri in ["/", "/missing", "/deeply/nested/path"] {
            let response = router().oneshot(request(Method::GET, uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        }
    }

    #[tokio::test]
    async fn every_supported_method_reaches_the_flow() {
        let mut endpoint = AppEndpoint::prefix("/");
        for method in SUPPORTED_METHODS {
            endpoint = endpoint.with_handler(
                method.clone(),
                EndpointHandler::new((), |input: HandlerInput<String, Body>| async move {
                    Ok::<_, BoxError>(HandlerOutput::no_content().with_header("x-method", input.method.as_str()))
                }),
            );
        }
        let router = router_with(vec![endpoint], initial_state(String::new()), None);

        for method in SUPPORTED_METHODS {
            let response = router
                .clone()
                .oneshot(request(method.clone(), "/any/where"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
            assert_eq!(response.headers()["x-method"], method.as_str());
        }
    }

    #[tokio::test]
    async fn unsupported_method_is_rejected_by_the_router() {
        let response = router().oneshot(request(Method::TRACE, "/path")).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn state_reaches_the_handler() {
        let response = router().oneshot(request(Method::GET, "/path")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(body_of(response).await, Bytes::from_static(b"\"State\""));
    }

    #[tokio::test]
    async fn body_of_any_content_type_arrives_unparsed() {
        let payload = vec![0u8, 159, 146, 150, b'{'];
        let request = Request::builder()
            .method(Method::POST)
            .uri("/path")
            .header("content-type", "application/x-unheard-of")
            .body(Body::from(payload.clone()))
            .unwrap();

        let response = router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/x-unheard-of");
        assert_eq!(body_of(response).await, Bytes::from(payload));
    }

    #[tokio::test]
    async fn large_bodies_are_not_capped_by_default() {
        let payload = vec![b'x'; 4 * 1024 * 1024];
        let request = Request::builder()
            .method(Method::POST)
            .uri("/path")
            .body(Body::from(payload.clone()))
            .unwrap();

        let response = router().oneshot(request).await.unwrap();

        assert_eq!(body_of(response).await.len(), payload.len());
    }

    #[tokio::test]
    async fn state_factory_failure_becomes_opaque_500_and_is_reported() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: EventObserver = Arc::new(move |event| sink.lock().unwrap().push(event.clone()));
        let failing = state_factory(|_: &mut Parts, _: &()| -> Result<Option<String>, BoxError> {
            Err("This should be caught.".into())
        });
        let router = router_with(
            vec![AppEndpoint::exact("/path").with_handler(Method::GET, echo_state())],
            failing,
            Some(observer),
        );

        let response = router.oneshot(request(Method::GET, "/path")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_of(response).await.is_empty());
        let seen = seen.lock().unwrap();
        assert!(matches!(
            seen.last(),
            Some(ServerEvent::Exception { error, .. }) if error.contains("This should be caught.")
        ));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_500() {
        let handler = EndpointHandler::new((), |_input: HandlerInput<String, Body>| async move {
            if true {
                panic!("handler exploded");
            }
            Ok::<_, BoxError>(HandlerOutput::no_content())
        });
        let router = router_with(
            vec![AppEndpoint::exact("/path").with_handler(Method::GET, handler)],
            initial_state(String::new()),
            None,
        );

        let response = router.oneshot(request(Method::GET, "/path")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn request_id_is_generated_and_echoed() {
        let response = router().oneshot(request(Method::GET, "/path")).await.unwrap();
        assert!(response.headers().contains_key("x-request-id"));

        let request = Request::builder()
            .uri("/path")
            .header("x-request-id", "given-id")
            .body(Body::empty())
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.headers()["x-request-id"], "given-id");
    }

    #[tokio::test]
    async fn configured_body_limit_rejects_large_bodies() {
        let flow = TypicalServerFlow::new(
            vec![AppEndpoint::exact("/path").with_handler(Method::POST, echo_body())],
            None,
        );
        let handler = FlowHandler::new(flow, Ops::default(), None);
        let options = RouteOptions {
            body_limit: Some(8),
            ..RouteOptions::default()
        };
        let router = register(Router::new(), handler, &options);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/path")
            .header("content-length", "32")
            .body(Body::from(vec![b'x'; 32]))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn panic_messages_are_extracted() {
        assert_eq!(panic_message(&"static"), "panic: static");
        assert_eq!(panic_message(&"owned".to_string()), "panic: owned");
        assert_eq!(panic_message(&42u8), "panic");
    }
}
