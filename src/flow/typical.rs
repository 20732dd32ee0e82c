//! Minimal endpoint dispatcher implementing [`ServerFlow`].

use axum::http::{Method, StatusCode};
use futures_util::future::BoxFuture;

use super::endpoint::{AppEndpoint, HandlerInput, HandlerOutput};
use super::events::{emit, EventObserver, ServerEvent};
use super::validation::ValidationFailure;
use super::{Content, ContextOperations, FlowError, HeaderInput, ServerFlow};

/// Dispatches each request to the first endpoint whose matcher accepts the path.
pub struct TypicalServerFlow<O: ContextOperations> {
    endpoints: Vec<AppEndpoint<O>>,
    events: Option<EventObserver>,
}

impl<O: ContextOperations> TypicalServerFlow<O> {
    pub fn new(endpoints: Vec<AppEndpoint<O>>, events: Option<EventObserver>) -> Self {
        Self { endpoints, events }
    }

    pub fn endpoints(&self) -> &[AppEndpoint<O>] {
        &self.endpoints
    }

    async fn dispatch(&self, ctx: &mut O::Context, ops: &O) -> Result<(), FlowError> {
        let method = ops.get_method(ctx).clone();
        let url = ops.get_url(ctx).clone();

        let Some(endpoint) = self.endpoints.iter().find(|e| e.matches(url.path())) else {
            tracing::debug!(%method, %url, "No endpoint matched");
            emit(self.events.as_ref(), || ServerEvent::InvalidUrl {
                method: method.clone(),
                url: url.clone(),
            });
            return respond_empty(ops, ctx, StatusCode::NOT_FOUND);
        };

        let Some(handler) = endpoint.handler_for(&method) else {
            let allowed = endpoint.allowed_methods();
            tracing::debug!(%method, %url, ?allowed, "Method not allowed");
            let allow = allowed
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            ops.set_header(ctx, "allow", HeaderInput::Text(allow))?;
            emit(self.events.as_ref(), || ServerEvent::InvalidMethod {
                method: method.clone(),
                url: url.clone(),
                allowed,
            });
            return respond_empty(ops, ctx, StatusCode::METHOD_NOT_ALLOWED);
        };

        let state = ops
            .get_state(ctx, handler.state_info())
            .map_err(FlowError::State)?;

        if let Some(validator) = handler.context_validator() {
            if let Err(failure) = validator.check(ctx)? {
                let (status, body) = match &failure {
                    ValidationFailure::Protocol(e) => (e.status_code, e.body.clone()),
                    ValidationFailure::Invalid(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
                };
                tracing::debug!(%method, %url, %status, %failure, "Context rejected");
                emit(self.events.as_ref(), || ServerEvent::InvalidContext {
                    method: method.clone(),
                    url: url.clone(),
                    failure,
                });
                ops.set_status_code(ctx, status)?;
                ops.send_content(ctx, body.map(Content::Text).unwrap_or_else(Content::empty))?;
                return Ok(());
            }
        }

        emit(self.events.as_ref(), || ServerEvent::SuccessfulInvocationStart {
            method: method.clone(),
            url: url.clone(),
        });

        let content_type = ops
            .get_header(ctx, "content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let input = HandlerInput {
            method: method.clone(),
            url: url.clone(),
            content_type,
            state,
            body: ops.get_request_body(ctx),
        };
        let output = handler.invoke(input).await.map_err(FlowError::Handler)?;
        let status = write_output(ops, ctx, output)?;

        emit(self.events.as_ref(), || ServerEvent::SuccessfulInvocationEnd {
            method,
            url,
            status,
        });
        Ok(())
    }
}

impl<O: ContextOperations> ServerFlow<O> for TypicalServerFlow<O> {
    fn serve<'a>(
        &'a self,
        ctx: &'a mut O::Context,
        ops: &'a O,
    ) -> BoxFuture<'a, Result<(), FlowError>> {
        Box::pin(self.dispatch(ctx, ops))
    }
}

fn respond_empty<O: ContextOperations>(
    ops: &O,
    ctx: &mut O::Context,
    status: StatusCode,
) -> Result<(), FlowError> {
    ops.set_status_code(ctx, status)?;
    ops.send_content(ctx, Content::empty())?;
    Ok(())
}

/// Headers first, then status, then body.
fn write_output<O: ContextOperations>(
    ops: &O,
    ctx: &mut O::Context,
    output: HandlerOutput,
) -> Result<StatusCode, FlowError> {
    for (name, value) in output.headers {
        ops.set_header(ctx, &name, value)?;
    }

    let (status, content) = match output.output {
        None => (output.status.unwrap_or(StatusCode::NO_CONTENT), Content::empty()),
        Some(content) => {
            if !output.content_type.is_empty() {
                ops.set_header(ctx, "content-type", HeaderInput::Text(output.content_type))?;
            }
            (output.status.unwrap_or(StatusCode::OK), content)
        }
    };
    ops.set_status_code(ctx, status)?;
    ops.send_content(ctx, content)?;
    Ok(status)
}
