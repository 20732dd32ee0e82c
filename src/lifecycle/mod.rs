//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signal received (Ctrl+C / SIGTERM)
//!     → Shutdown::trigger
//!     → accept loops stop
//!     → tracked connections drain (bounded wait)
//! ```

pub mod shutdown;

pub use shutdown::{termination_signal, Shutdown};
