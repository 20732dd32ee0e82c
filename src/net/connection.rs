//! Per-connection serving and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live connections
//! - Drive one connection with the hyper builder its shape calls for
//! - Close a connection gracefully once the server starts stopping

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{BoxError, Router};
use hyper_util::rt::TokioIo;
#[cfg(feature = "http2")]
use hyper_util::rt::TokioExecutor;
#[cfg(feature = "http2")]
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulConnection;
use hyper_util::service::TowerToHyperService;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::http::options::{self, ServerOptions};
use crate::http::server::{HttpVersion, ServerShape};
use crate::net::listener::DEFAULT_MAX_CONNECTIONS;

/// Relaxed ordering is enough: IDs only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Counts live connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. The guard decrements the count on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Transport settings read from [`ServerOptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// HTTP/1.1 persistent connections. Off closes after every response.
    pub keep_alive: bool,
    /// Per-connection HTTP/2 stream cap. `None` keeps hyper's default.
    pub max_concurrent_streams: Option<u32>,
    /// Let an HTTP/2 server answer HTTP/1.1 clients too.
    pub allow_http1: bool,
    /// Open connections held at once; further accepts wait for a slot.
    pub max_connections: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            keep_alive: true,
            max_concurrent_streams: None,
            allow_http1: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl ConnectionSettings {
    pub fn from_options(options: &ServerOptions) -> Self {
        let defaults = Self::default();
        for key in options.keys() {
            if !is_honoured(key) {
                tracing::debug!(option = key, "Server option not used by the transport");
            }
        }
        Self {
            keep_alive: options.get_bool(options::KEEP_ALIVE).unwrap_or(defaults.keep_alive),
            max_concurrent_streams: options
                .get_u64(options::MAX_CONCURRENT_STREAMS)
                .and_then(|n| u32::try_from(n).ok()),
            allow_http1: options.get_bool(options::ALLOW_HTTP1).unwrap_or(defaults.allow_http1),
            max_connections: options
                .get_u64(options::MAX_CONNECTIONS)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(defaults.max_connections),
        }
    }
}

fn is_honoured(key: &str) -> bool {
    matches!(
        key,
        options::CERT
            | options::KEY
            | options::ALLOW_HTTP1
            | options::MAX_CONNECTIONS
            | options::KEEP_ALIVE
            | options::MAX_CONCURRENT_STREAMS
    )
}

/// Which HTTP framing a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionProtocol {
    Http1,
    Http2,
    /// Sniff the preface and serve either.
    Auto,
}

impl ConnectionProtocol {
    /// HTTP/2 shapes serve HTTP/1.1 too only when `allow_http1` is set.
    pub fn for_shape(shape: ServerShape, allow_http1: bool) -> Self {
        match shape.version() {
            HttpVersion::Http1 => Self::Http1,
            HttpVersion::Http2 if allow_http1 => Self::Auto,
            HttpVersion::Http2 => Self::Http2,
        }
    }
}

/// Serve HTTP on one established byte stream until the peer goes away
/// or `stopping` turns true, in which case in-flight requests finish and
/// the connection is closed.
pub async fn serve_connection<IO>(
    io: IO,
    protocol: ConnectionProtocol,
    router: Router,
    settings: &ConnectionSettings,
    mut stopping: watch::Receiver<bool>,
) -> Result<(), BoxError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(io);
    let service = TowerToHyperService::new(router);

    match protocol {
        ConnectionProtocol::Http1 => {
            let connection = hyper::server::conn::http1::Builder::new()
                .keep_alive(settings.keep_alive)
                .serve_connection(io, service);
            until_stopped(connection, &mut stopping).await
        }
        #[cfg(feature = "http2")]
        ConnectionProtocol::Http2 => {
            let mut builder = hyper::server::conn::http2::Builder::new(TokioExecutor::new());
            if let Some(streams) = settings.max_concurrent_streams {
                builder.max_concurrent_streams(streams);
            }
            until_stopped(builder.serve_connection(io, service), &mut stopping).await
        }
        #[cfg(feature = "http2")]
        ConnectionProtocol::Auto => {
            let mut builder = auto::Builder::new(TokioExecutor::new());
            builder.http1().keep_alive(settings.keep_alive);
            if let Some(streams) = settings.max_concurrent_streams {
                builder.http2().max_concurrent_streams(streams);
            }
            until_stopped(builder.serve_connection(io, service), &mut stopping).await
        }
        #[cfg(not(feature = "http2"))]
        ConnectionProtocol::Http2 | ConnectionProtocol::Auto => {
            Err("HTTP/2 support is not compiled in".into())
        }
    }
}

async fn until_stopped<C>(connection: C, stopping: &mut watch::Receiver<bool>) -> Result<(), BoxError>
where
    C: GracefulConnection,
    C::Error: Into<BoxError>,
{
    tokio::pin!(connection);
    tokio::select! {
        result = connection.as_mut() => return result.map_err(Into::into),
        // A dropped sender means the accept loop is gone; stop as well.
        _ = stopping.wait_for(|stop| *stop) => connection.as_mut().graceful_shutdown(),
    }
    connection.await.map_err(Into::into)
}

/// How accepted sockets become byte streams.
#[derive(Clone)]
pub enum Acceptor {
    Plain,
    #[cfg(feature = "tls")]
    Tls(axum_server::tls_rustls::RustlsAcceptor),
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => f.write_str("Plain"),
            #[cfg(feature = "tls")]
            Self::Tls(_) => f.write_str("Tls"),
        }
    }
}

impl Acceptor {
    /// Run the handshake (if any), then serve the connection.
    pub async fn handle(
        &self,
        stream: TcpStream,
        protocol: ConnectionProtocol,
        router: Router,
        settings: &ConnectionSettings,
        stopping: watch::Receiver<bool>,
    ) -> Result<(), BoxError> {
        match self {
            Self::Plain => serve_connection(stream, protocol, router, settings, stopping).await,
            #[cfg(feature = "tls")]
            Self::Tls(acceptor) => {
                use axum_server::accept::Accept;
                let (stream, ()) = acceptor.accept(stream, ()).await?;
                serve_connection(stream, protocol, router, settings, stopping).await
            }
        }
    }
}
