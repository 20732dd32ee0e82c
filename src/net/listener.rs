//! TCP listener with a connection cap.
//!
//! # Responsibilities
//! - Bind the requested host and port with a chosen accept backlog
//! - Enforce `max_connections` via semaphore
//! - Hand out a permit that lives as long as the connection

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Applied when the options do not set `max_connections`.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// Pending-connection queue length used by [`Listener::bind`].
pub const DEFAULT_BACKLOG: u32 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The address did not resolve, or the socket could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    /// Taking a connection off the socket failed, or its address was unreadable.
    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),
    /// The connection limit semaphore was closed.
    #[error("connection limit closed")]
    Closed,
}

/// A TCP listener that holds at most `max_connections` open connections.
///
/// When the limit is reached, `accept` waits for a slot before taking the
/// next connection off the socket.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(host: &str, port: u16, max_connections: usize) -> Result<Self, ListenerError> {
        Self::bind_with_backlog(host, port, DEFAULT_BACKLOG, max_connections).await
    }

    /// Bind the first address `host` resolves to, queueing at most
    /// `backlog` connections the server has not accepted yet.
    pub async fn bind_with_backlog(
        host: &str,
        port: u16,
        backlog: u32,
        max_connections: usize,
    ) -> Result<Self, ListenerError> {
        let listener = bind_socket(host, port, backlog)
            .await
            .map_err(|source| ListenerError::Bind {
                address: format!("{}:{}", host, port),
                source,
            })?;
        tracing::debug!(host, port, backlog, "Socket bound");
        Ok(Self::from_tcp(listener, max_connections))
    }

    /// Wrap an already bound socket.
    pub fn from_tcp(listener: TcpListener, max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Accept a new connection, waiting while the limit is reached.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

async fn bind_socket(host: &str, port: u16, backlog: u32) -> io::Result<TcpListener> {
    let address = tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no address"))?;

    let socket = if address.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket.bind(address)?;
    socket.listen(backlog)
}

/// A connection slot. Dropping it frees the slot, even on panic.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
