//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! flow, registrar, net
//!     → tracing events with structured fields
//!     → logging.rs (EnvFilter + fmt layer)
//!     → stdout
//! ```
//!
//! Request-scoped spans come from tower-http's `TraceLayer`; request IDs
//! from `x-request-id`.

pub mod logging;
