//! Context validation with optional remapping to a protocol error.
//!
//! What a validator says went wrong is not necessarily what the client
//! should see. When a [`ProtocolErrorInfo`] is configured every failure is
//! replaced by that status and body; otherwise the failure passes through.

use std::marker::PhantomData;

use axum::http::StatusCode;

use super::context::Context;
use crate::flow::{ContextCheck, ProtocolError, ValidationFailure, ValidationResult};
use crate::state::{self, StateError};

/// The client-visible error to report instead of a validator's failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolErrorInfo {
    /// Status only; the body stays empty.
    Status(StatusCode),
    WithBody {
        status_code: StatusCode,
        body: Option<String>,
    },
}

impl ProtocolErrorInfo {
    fn to_error(&self) -> ProtocolError {
        match self {
            ProtocolErrorInfo::Status(status_code) => ProtocolError {
                status_code: *status_code,
                body: None,
            },
            ProtocolErrorInfo::WithBody { status_code, body } => ProtocolError {
                status_code: *status_code,
                body: body.clone(),
            },
        }
    }
}

impl From<StatusCode> for ProtocolErrorInfo {
    fn from(status_code: StatusCode) -> Self {
        Self::Status(status_code)
    }
}

impl From<(StatusCode, &str)> for ProtocolErrorInfo {
    fn from((status_code, body): (StatusCode, &str)) -> Self {
        Self::WithBody {
            status_code,
            body: Some(body.to_string()),
        }
    }
}

/// A context that passed validation, carrying the narrowed state.
///
/// Borrows the very context that was validated; nothing is copied.
#[derive(Debug)]
pub struct Validated<'c, O> {
    context: &'c mut Context,
    state: O,
}

impl<'c, O> Validated<'c, O> {
    pub fn context(&self) -> &Context {
        self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        self.context
    }

    pub fn state(&self) -> &O {
        &self.state
    }

    pub fn into_parts(self) -> (&'c mut Context, O) {
        (self.context, self.state)
    }
}

/// Validates the state attached to a [`Context`].
pub struct ContextValidator<S, O, F> {
    validator: F,
    protocol_error: Option<ProtocolErrorInfo>,
    _marker: PhantomData<fn(&S) -> O>,
}

/// Build a [`ContextValidator`] from a state validator.
pub fn validate_context_state<S, O, F>(
    validator: F,
    protocol_error: Option<ProtocolErrorInfo>,
) -> ContextValidator<S, O, F>
where
    F: Fn(&S) -> ValidationResult<O>,
{
    ContextValidator {
        validator,
        protocol_error,
        _marker: PhantomData,
    }
}

impl<S, O, F> ContextValidator<S, O, F>
where
    S: Clone + Send + Sync + 'static,
    F: Fn(&S) -> ValidationResult<O>,
{
    /// Run the validator on the state attached to `ctx`.
    ///
    /// Missing state is a [`StateError`]; a rejected state is a value.
    pub fn validate<'c>(
        &self,
        ctx: &'c mut Context,
    ) -> Result<ValidationResult<Validated<'c, O>>, StateError> {
        let state = state::get_or_init::<S, _>(ctx, None)?;
        Ok(match (self.validator)(state) {
            Ok(state) => Ok(Validated { context: ctx, state }),
            Err(failure) => Err(self.remap(failure)),
        })
    }

    pub fn get_state<'c>(&self, ctx: &'c mut Context) -> Result<&'c mut S, StateError> {
        state::get_or_init(ctx, None)
    }

    fn remap(&self, failure: ValidationFailure) -> ValidationFailure {
        match &self.protocol_error {
            None => failure,
            Some(info) => ValidationFailure::Protocol(info.to_error()),
        }
    }
}

impl<S, O, F> ContextCheck<Context> for ContextValidator<S, O, F>
where
    S: Clone + Send + Sync + 'static,
    F: Fn(&S) -> ValidationResult<O> + Send + Sync,
{
    fn check(&self, ctx: &mut Context) -> Result<ValidationResult<()>, StateError> {
        Ok(self.validate(ctx)?.map(|_| ()))
    }
}
