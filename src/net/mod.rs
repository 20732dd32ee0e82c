//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection cap)
//!     → tls.rs (optional TLS handshake, ALPN per shape)
//!     → connection.rs (tracking, hyper http1/http2/auto)
//!     → axum router (catch-all route → flow)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - On shutdown each connection closes after its in-flight requests; stragglers are dropped after the drain
//! - TLS material loads before the socket is bound

pub mod connection;
pub mod listener;
pub mod tls;
