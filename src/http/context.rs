//! Per-request context threaded through the flow.
//!
//! `http::response::Builder` is consumed by every `header`/`status` call and
//! hands back a new builder. [`ResponseHandle`] keeps the live builder in a
//! single slot and stores the returned builder back after each write, so no
//! mutation is ever applied to a stale handle.

use std::fmt;
use std::mem;

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{request::Parts, response::Builder, Extensions, Method, Request, Response, StatusCode, Uri};

use crate::flow::{Content, HeaderInput, ResponseError};
use crate::state::StateCarrier;

enum Slot {
    Pending(Builder),
    Sent(Response<Body>),
    /// A build failed mid-write; nothing can be recovered from here.
    Poisoned,
}

/// Single-owner cell around the in-progress response.
pub struct ResponseHandle {
    slot: Slot,
}

impl ResponseHandle {
    pub fn new() -> Self {
        Self {
            slot: Slot::Pending(Response::builder()),
        }
    }

    /// Move the builder out, apply `write`, and store the returned builder.
    pub fn replace(&mut self, write: impl FnOnce(Builder) -> Builder) -> Result<(), ResponseError> {
        match mem::replace(&mut self.slot, Slot::Poisoned) {
            Slot::Pending(builder) => {
                self.slot = Slot::Pending(write(builder));
                Ok(())
            }
            other => {
                self.slot = other;
                Err(ResponseError::Finalized)
            }
        }
    }

    /// Last write wins per header name. List values become repeated lines.
    pub fn set_header(&mut self, name: &str, value: HeaderInput) -> Result<(), ResponseError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ResponseError::InvalidHeaderName(name.to_string()))?;
        let values = header_values(&name, value)?;
        self.replace(|builder| {
            let mut builder = builder;
            if let Some(headers) = builder.headers_mut() {
                headers.remove(&name);
            }
            values
                .into_iter()
                .fold(builder, |builder, value| builder.header(&name, value))
        })
    }

    pub fn set_status(&mut self, status: StatusCode) -> Result<(), ResponseError> {
        self.replace(|builder| builder.status(status))
    }

    /// Attach the body and freeze the response.
    pub fn finalize(&mut self, content: Content) -> Result<(), ResponseError> {
        match mem::replace(&mut self.slot, Slot::Poisoned) {
            Slot::Pending(builder) => {
                let response = builder.body(Body::from(content.into_bytes()))?;
                self.slot = Slot::Sent(response);
                Ok(())
            }
            other => {
                self.slot = other;
                Err(ResponseError::Finalized)
            }
        }
    }

    pub fn is_finalized(&self) -> bool {
        !matches!(self.slot, Slot::Pending(_))
    }

    pub fn headers(&self) -> Option<&axum::http::HeaderMap> {
        match &self.slot {
            Slot::Pending(builder) => builder.headers_ref(),
            Slot::Sent(response) => Some(response.headers()),
            Slot::Poisoned => None,
        }
    }

    /// The finished response, finalising an unsent builder with an empty body.
    pub fn into_response(self) -> Result<Response<Body>, ResponseError> {
        match self.slot {
            Slot::Pending(builder) => Ok(builder.body(Body::empty())?),
            Slot::Sent(response) => Ok(response),
            Slot::Poisoned => Err(ResponseError::Finalized),
        }
    }

    /// The response only if the body was already sent.
    pub fn into_sent(self) -> Option<Response<Body>> {
        match self.slot {
            Slot::Sent(response) => Some(response),
            _ => None,
        }
    }
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = match &self.slot {
            Slot::Pending(_) => "pending",
            Slot::Sent(_) => "sent",
            Slot::Poisoned => "poisoned",
        };
        f.debug_struct("ResponseHandle").field("slot", &slot).finish()
    }
}

impl Default for ResponseHandle {
    fn default() -> Self {
        Self::new()
    }
}

fn header_values(name: &HeaderName, value: HeaderInput) -> Result<Vec<HeaderValue>, ResponseError> {
    let invalid = |_| ResponseError::InvalidHeaderValue(name.to_string());
    match value {
        HeaderInput::Text(text) => Ok(vec![HeaderValue::from_str(&text).map_err(invalid)?]),
        HeaderInput::Number(number) => Ok(vec![HeaderValue::from(number)]),
        HeaderInput::List(values) => values
            .iter()
            .map(|v| HeaderValue::from_str(v).map_err(invalid))
            .collect(),
    }
}

/// The request head, its not-yet-consumed body, and the response being built.
pub struct Context {
    request: Parts,
    body: Option<Body>,
    response: ResponseHandle,
}

impl Context {
    pub fn new(request: Request<Body>) -> Self {
        let (request, body) = request.into_parts();
        Self {
            request,
            body: Some(body),
            response: ResponseHandle::new(),
        }
    }

    pub fn request(&self) -> &Parts {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Parts {
        &mut self.request
    }

    pub fn method(&self) -> &Method {
        &self.request.method
    }

    pub fn uri(&self) -> &Uri {
        &self.request.uri
    }

    /// Hand out the raw body. Only the first caller gets it.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    pub fn response(&self) -> &ResponseHandle {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ResponseHandle {
        &mut self.response
    }

    pub fn into_response(self) -> ResponseHandle {
        self.response
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.request.method)
            .field("uri", &self.request.uri)
            .field("body_taken", &self.body.is_none())
            .field("response", &self.response)
            .finish()
    }
}

impl StateCarrier for Context {
    fn extensions(&self) -> &Extensions {
        &self.request.extensions
    }

    fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.request.extensions
    }
}
