//! Per-request state subsystem.
//!
//! # Data Flow
//! ```text
//! pre-flow middleware ──mutate()──┐
//!                                 ▼
//!                    request extensions (AttachedState)
//!                                 ▲
//! state factory ──get_or_init()───┤
//!                                 │
//! context validator ──get_or_init(None)
//! ```
//!
//! # Design Decisions
//! - One reserved extension slot per request; set once, never replaced
//! - Asking for a type other than the attached one is an error
//! - Lazy: the first caller that supplies an initial value attaches it
//! - Absence without an initial value is an error, not a default
//! - Not synchronised: a request is owned by exactly one task at a time

pub mod attached;

pub use attached::{get, get_or_init, is_attached, mutate, StateCarrier, StateError};
