//! Lazy, idempotent attachment of one state value to an in-flight request.

use std::any::{self, Any};

use axum::http::{request::Parts, Extensions, Request};

/// Error returned when the attached state cannot be handed out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// Nothing is attached and no initial value was given.
    #[error("state of type `{type_name}` must be present in request, but none was attached or supplied")]
    Required { type_name: &'static str },
    /// The slot already holds state of another type.
    #[error("state of type `{expected}` was requested, but `{attached}` is attached")]
    TypeMismatch {
        expected: &'static str,
        attached: &'static str,
    },
}

impl StateError {
    fn required<T>() -> Self {
        Self::Required {
            type_name: any::type_name::<T>(),
        }
    }
}

/// Anything that can carry per-request state in its extensions.
pub trait StateCarrier {
    fn extensions(&self) -> &Extensions;
    fn extensions_mut(&mut self) -> &mut Extensions;
}

impl<B> StateCarrier for Request<B> {
    fn extensions(&self) -> &Extensions {
        Request::extensions(self)
    }

    fn extensions_mut(&mut self) -> &mut Extensions {
        Request::extensions_mut(self)
    }
}

impl StateCarrier for Parts {
    fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

trait StateValue: Any + Send + Sync {
    fn clone_boxed(&self) -> Box<dyn StateValue>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Clone + Send + Sync + 'static> StateValue for T {
    fn clone_boxed(&self) -> Box<dyn StateValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        any::type_name::<T>()
    }
}

/// The reserved slot. There is exactly one per request whatever the state
/// type, and it never collides with ordinary extensions.
struct AttachedState(Box<dyn StateValue>);

impl Clone for AttachedState {
    fn clone(&self) -> Self {
        Self(self.0.clone_boxed())
    }
}

impl AttachedState {
    fn new<T: Clone + Send + Sync + 'static>(value: T) -> Self {
        Self(Box::new(value))
    }

    fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }

    fn downcast_mut<T: 'static>(&mut self) -> Result<&mut T, StateError> {
        let attached = self.0.type_name();
        self.0
            .as_any_mut()
            .downcast_mut()
            .ok_or(StateError::TypeMismatch {
                expected: any::type_name::<T>(),
                attached,
            })
    }
}

/// Return the state attached to `request`, attaching `initial` first if
/// nothing is there yet.
///
/// Repeated calls always hand out the value attached by the first caller;
/// a later `initial` is dropped, never written over the existing state.
/// Asking for a type other than the attached one is a
/// [`StateError::TypeMismatch`].
pub fn get_or_init<T, R>(request: &mut R, initial: Option<T>) -> Result<&mut T, StateError>
where
    T: Clone + Send + Sync + 'static,
    R: StateCarrier + ?Sized,
{
    let extensions = request.extensions_mut();
    if extensions.get::<AttachedState>().is_none() {
        match initial {
            Some(value) => {
                extensions.insert(AttachedState::new(value));
            }
            None => return Err(StateError::required::<T>()),
        }
    }

    extensions
        .get_mut::<AttachedState>()
        .ok_or_else(StateError::required::<T>)?
        .downcast_mut()
}

/// Prime the state of `request` and modify it in place.
///
/// Meant for middleware that runs before the flow and wants to seed state
/// without replacing whatever an earlier layer attached.
pub fn mutate<T, R, F>(request: &mut R, initial: T, modify: F) -> Result<(), StateError>
where
    T: Clone + Send + Sync + 'static,
    R: StateCarrier + ?Sized,
    F: FnOnce(&mut T),
{
    modify(get_or_init(request, Some(initial))?);
    Ok(())
}

/// Peek at the attached state without initialising it. `None` when nothing
/// is attached or the attached state is of another type.
pub fn get<T, R>(request: &R) -> Option<&T>
where
    T: Send + Sync + 'static,
    R: StateCarrier + ?Sized,
{
    request
        .extensions()
        .get::<AttachedState>()
        .and_then(AttachedState::downcast_ref)
}

/// Whether any state has been attached to `request`, of any type.
pub fn is_attached<R>(request: &R) -> bool
where
    R: StateCarrier + ?Sized,
{
    request.extensions().get::<AttachedState>().is_some()
}
