//! Maps an axum request/response pair onto the flow's operation set.
//!
//! # Responsibilities
//! - Pure reads of URL, method, and headers from the request head
//! - Hand the raw body to the flow without parsing it
//! - Delegate state creation to the injected factory
//! - Route every response write through the context's [`ResponseHandle`]
//!
//! [`ResponseHandle`]: super::context::ResponseHandle

use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{request::Parts, HeaderValue, Method, StatusCode, Uri};
use axum::BoxError;

use super::context::Context;
use crate::flow::{Content, ContextOperations, HeaderInput, ResponseError};
use crate::state;

/// Creates the state for one request from the request head and the
/// endpoint's state info. `Ok(None)` means "no state for this endpoint".
pub type CreateState<S, I> =
    Arc<dyn Fn(&mut Parts, &I) -> Result<Option<S>, BoxError> + Send + Sync>;

/// Wrap a closure as a [`CreateState`].
pub fn state_factory<S, I, F>(create: F) -> CreateState<S, I>
where
    F: Fn(&mut Parts, &I) -> Result<Option<S>, BoxError> + Send + Sync + 'static,
{
    Arc::new(create)
}

/// A factory that attaches `value` on first use and afterwards returns
/// whatever is attached, including state seeded by earlier middleware.
pub fn initial_state<S, I>(value: S) -> CreateState<S, I>
where
    S: Clone + Send + Sync + 'static,
    I: 'static,
{
    Arc::new(move |request: &mut Parts, _info: &I| -> Result<Option<S>, BoxError> {
        let attached = state::get_or_init(request, Some(value.clone()))?;
        Ok(Some(attached.clone()))
    })
}

/// [`ContextOperations`] for axum [`Context`]s.
pub struct AxumOperations<S, I = ()> {
    create_state: Option<CreateState<S, I>>,
}

impl<S, I> AxumOperations<S, I> {
    pub fn new(create_state: Option<CreateState<S, I>>) -> Self {
        Self { create_state }
    }
}

impl<S, I> Default for AxumOperations<S, I> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<S, I> fmt::Debug for AxumOperations<S, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AxumOperations")
            .field("create_state", &self.create_state.is_some())
            .finish()
    }
}

impl<S, I> ContextOperations for AxumOperations<S, I>
where
    S: Send + 'static,
    I: Send + Sync + 'static,
{
    type Context = Context;
    type State = S;
    type StateInfo = I;
    type RequestBody = Body;

    fn get_url<'c>(&self, ctx: &'c Context) -> &'c Uri {
        ctx.uri()
    }

    fn get_method<'c>(&self, ctx: &'c Context) -> &'c Method {
        ctx.method()
    }

    fn get_header<'c>(&self, ctx: &'c Context, name: &str) -> Option<&'c HeaderValue> {
        ctx.request().headers.get(name)
    }

    fn get_request_body(&self, ctx: &mut Context) -> Option<Body> {
        ctx.take_body()
    }

    fn get_state(&self, ctx: &mut Context, state_info: &I) -> Result<Option<S>, BoxError> {
        match &self.create_state {
            Some(create) => create(ctx.request_mut(), state_info),
            None => Ok(None),
        }
    }

    fn set_header(&self, ctx: &mut Context, name: &str, value: HeaderInput) -> Result<(), ResponseError> {
        ctx.response_mut().set_header(name, value)
    }

    fn set_status_code(&self, ctx: &mut Context, status: StatusCode) -> Result<(), ResponseError> {
        ctx.response_mut().set_status(status)
    }

    fn send_content(&self, ctx: &mut Context, content: Content) -> Result<(), ResponseError> {
        ctx.response_mut().finalize(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn context() -> Context {
        Context::new(
            Request::builder()
                .method(Method::PUT)
                .uri("/items/7?full=true")
                .header("x-trace", "abc")
                .body(Body::from("raw"))
                .unwrap(),
        )
    }

    #[test]
    fn reads_come_from_the_request() {
        let ops = AxumOperations::<(), ()>::default();
        let mut ctx = context();

        assert_eq!(ops.get_url(&ctx).to_string(), "/items/7?full=true");
        assert_eq!(ops.get_method(&ctx), &Method::PUT);
        assert_eq!(ops.get_header(&ctx, "x-trace").unwrap(), "abc");
        assert!(ops.get_header(&ctx, "x-missing").is_none());
        assert!(ops.get_request_body(&mut ctx).is_some());
        assert!(ops.get_request_body(&mut ctx).is_none());
    }

    #[test]
    fn state_without_factory_is_none() {
        let ops = AxumOperations::<String, ()>::default();
        assert_eq!(ops.get_state(&mut context(), &()).unwrap(), None);
    }

    #[test]
    fn initial_state_keeps_what_middleware_seeded() {
        let ops = AxumOperations::new(Some(initial_state::<String, ()>("initial".to_string())));
        let mut ctx = context();
        state::mutate(&mut ctx, "seeded".to_string(), |_| {}).unwrap();

        assert_eq!(ops.get_state(&mut ctx, &()).unwrap().as_deref(), Some("seeded"));
    }

    #[test]
    fn initial_state_attaches_once() {
        let ops = AxumOperations::new(Some(initial_state::<String, ()>("initial".to_string())));
        let mut ctx = context();

        ops.get_state(&mut ctx, &()).unwrap();
        state::mutate(&mut ctx, String::new(), |s| s.push_str("+changed")).unwrap();

        assert_eq!(
            ops.get_state(&mut ctx, &()).unwrap().as_deref(),
            Some("initial+changed")
        );
    }

    #[test]
    fn factory_receives_state_info() {
        let create = state_factory(|request: &mut Parts, scope: &&'static str| {
            Ok(Some(format!("{} {}", scope, request.uri.path())))
        });
        let ops = AxumOperations::new(Some(create));

        assert_eq!(
            ops.get_state(&mut context(), &"admin").unwrap().as_deref(),
            Some("admin /items/7")
        );
    }

    #[test]
    fn factory_errors_propagate() {
        let create = state_factory(|_: &mut Parts, _: &()| -> Result<Option<u8>, BoxError> {
            Err("This should be caught.".into())
        });
        let ops = AxumOperations::new(Some(create));

        assert!(ops.get_state(&mut context(), &()).is_err());
    }

    #[test]
    fn writes_accumulate_on_the_context_response() {
        let ops = AxumOperations::<(), ()>::default();
        let mut ctx = context();

        ops.set_header(&mut ctx, "content-type", "application/json".into()).unwrap();
        ops.set_status_code(&mut ctx, StatusCode::CREATED).unwrap();
        ops.set_header(&mut ctx, "x-count", 3u64.into()).unwrap();
        ops.send_content(&mut ctx, Content::from("{}")).unwrap();

        assert!(matches!(
            ops.set_status_code(&mut ctx, StatusCode::OK),
            Err(ResponseError::Finalized)
        ));

        let response = ctx.into_response().into_response().unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(response.headers()["x-count"], "3");
    }
}
