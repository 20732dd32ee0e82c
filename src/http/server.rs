//! Server construction: shape resolution, building, and listening.
//!
//! # Responsibilities
//! - Resolve protocol version and transport security into one of four shapes
//! - Build the catch-all router around a [`TypicalServerFlow`]
//! - Bind, accept, and serve connections for the resolved shape
//!
//! # Design Decisions
//! - Security is explicit when asked for, otherwise inferred from TLS option keys
//! - Builds fail early when the binary lacks a shape's protocol support
//! - TLS material is loaded before the socket is bound

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};

use super::adapter::{AxumOperations, CreateState};
use super::options::ServerOptions;
use super::registrar::{register, FlowHandler, RouteOptions};
use super::Endpoint;
use crate::flow::{EventObserver, TypicalServerFlow};
use crate::net::connection::{Acceptor, ConnectionProtocol, ConnectionSettings, ConnectionTracker};
use crate::net::listener::{Listener, ListenerError, DEFAULT_BACKLOG};
use crate::net::tls::TlsSource;

/// TLS option keys understood by both protocol versions.
pub const HTTP1_TLS_KEYS: &[&str] = &[
    "ca",
    "cert",
    "ciphers",
    "crl",
    "dhparam",
    "ecdh_curve",
    "honor_cipher_order",
    "key",
    "max_version",
    "min_version",
    "passphrase",
    "pfx",
    "private_key_engine",
    "private_key_identifier",
    "secure_options",
    "secure_protocol",
    "session_id_context",
    "session_timeout",
    "sigalgs",
    "ticket_keys",
    "client_cert_engine",
    "request_cert",
    "reject_unauthorized",
    "alpn_protocols",
    "sni_callback",
];

/// Extra TLS option keys that only count for HTTP/2.
pub const HTTP2_ONLY_TLS_KEYS: &[&str] = &["allow_http1", "origins"];

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("unsupported HTTP version {0}, expected 1 or 2")]
    UnsupportedHttpVersion(u8),
    #[error("HTTP/2 requested but this build lacks the `http2` feature")]
    Http2Unsupported,
    #[error("TLS requested but this build lacks the `tls` feature")]
    TlsUnsupported,
}

#[derive(Debug, thiserror::Error)]
pub enum ListenError {
    #[error("secure server needs both `cert` and `key` options")]
    MissingCertificate,
    #[error("failed to load TLS material: {0}")]
    Tls(#[source] std::io::Error),
    #[error("TLS requested but this build lacks the `tls` feature")]
    TlsUnsupported,
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVersion {
    #[default]
    Http1,
    Http2,
}

impl TryFrom<u8> for HttpVersion {
    type Error = BuildError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Http1),
            2 => Ok(Self::Http2),
            other => Err(BuildError::UnsupportedHttpVersion(other)),
        }
    }
}

/// Whether the transport is secure, and how that was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Explicit(bool),
    Inferred(bool),
}

impl Security {
    pub fn is_secure(self) -> bool {
        match self {
            Self::Explicit(secure) | Self::Inferred(secure) => secure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerShape {
    Http1,
    Http1Tls,
    Http2,
    Http2Tls,
}

impl ServerShape {
    pub fn new(version: HttpVersion, secure: bool) -> Self {
        match (version, secure) {
            (HttpVersion::Http1, false) => Self::Http1,
            (HttpVersion::Http1, true) => Self::Http1Tls,
            (HttpVersion::Http2, false) => Self::Http2,
            (HttpVersion::Http2, true) => Self::Http2Tls,
        }
    }

    pub fn version(self) -> HttpVersion {
        match self {
            Self::Http1 | Self::Http1Tls => HttpVersion::Http1,
            Self::Http2 | Self::Http2Tls => HttpVersion::Http2,
        }
    }

    pub fn is_secure(self) -> bool {
        matches!(self, Self::Http1Tls | Self::Http2Tls)
    }
}

pub fn is_tls_key(version: HttpVersion, key: &str) -> bool {
    HTTP1_TLS_KEYS.contains(&key)
        || (version == HttpVersion::Http2 && HTTP2_ONLY_TLS_KEYS.contains(&key))
}

/// Best effort: any TLS-looking option key means "secure".
pub fn infer_security(version: HttpVersion, options: &ServerOptions) -> bool {
    options.keys().any(|key| is_tls_key(version, key))
}

pub fn resolve_security(version: HttpVersion, secure: Option<bool>, options: &ServerOptions) -> Security {
    match secure {
        Some(secure) => Security::Explicit(secure),
        None => Security::Inferred(infer_security(version, options)),
    }
}

/// Version defaults to HTTP/1.
pub fn resolve_shape(
    version: Option<HttpVersion>,
    secure: Option<bool>,
    options: &ServerOptions,
) -> (ServerShape, Security) {
    let version = version.unwrap_or_default();
    let security = resolve_security(version, secure, options);
    (ServerShape::new(version, security.is_secure()), security)
}

/// Everything needed to create a server.
pub struct ServerCreationOptions<S, I = ()>
where
    S: Send + 'static,
    I: Send + Sync + 'static,
{
    pub endpoints: Vec<Endpoint<S, I>>,
    pub create_state: Option<CreateState<S, I>>,
    pub events: Option<EventObserver>,
    pub http_version: Option<HttpVersion>,
    pub secure: Option<bool>,
    pub options: ServerOptions,
    pub route: RouteOptions,
}

impl<S, I> ServerCreationOptions<S, I>
where
    S: Send + 'static,
    I: Send + Sync + 'static,
{
    pub fn new(endpoints: Vec<Endpoint<S, I>>) -> Self {
        Self {
            endpoints,
            create_state: None,
            events: None,
            http_version: None,
            secure: None,
            options: ServerOptions::default(),
            route: RouteOptions::default(),
        }
    }

    pub fn with_create_state(mut self, create_state: CreateState<S, I>) -> Self {
        self.create_state = Some(create_state);
        self
    }

    pub fn with_events(mut self, events: EventObserver) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_http_version(mut self, version: HttpVersion) -> Self {
        self.http_version = Some(version);
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    pub fn with_options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_route_options(mut self, route: RouteOptions) -> Self {
        self.route = route;
        self
    }
}

/// Resolve the shape from `options` and build a server for it.
pub fn create_server<S, I>(options: ServerCreationOptions<S, I>) -> Result<ServerHandle, BuildError>
where
    S: Send + 'static,
    I: Send + Sync + 'static,
{
    ServerBuilder::resolve(options.http_version, options.secure, &options.options).build(options)
}

/// Builds a server of an already resolved shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerBuilder {
    shape: ServerShape,
    security: Security,
}

impl ServerBuilder {
    pub fn resolve(version: Option<HttpVersion>, secure: Option<bool>, options: &ServerOptions) -> Self {
        let (shape, security) = resolve_shape(version, secure, options);
        Self { shape, security }
    }

    pub fn shape(&self) -> ServerShape {
        self.shape
    }

    pub fn security(&self) -> Security {
        self.security
    }

    pub fn build<S, I>(self, creation: ServerCreationOptions<S, I>) -> Result<ServerHandle, BuildError>
    where
        S: Send + 'static,
        I: Send + Sync + 'static,
    {
        if self.shape.version() == HttpVersion::Http2 && !cfg!(feature = "http2") {
            return Err(BuildError::Http2Unsupported);
        }
        if self.shape.is_secure() && !cfg!(feature = "tls") {
            return Err(BuildError::TlsUnsupported);
        }

        let ServerCreationOptions {
            endpoints,
            create_state,
            events,
            options,
            route,
            ..
        } = creation;

        let flow = TypicalServerFlow::new(endpoints, events.clone());
        let handler = FlowHandler::new(flow, AxumOperations::new(create_state), events);
        let router = register(Router::new(), handler, &route);

        tracing::debug!(shape = ?self.shape, security = ?self.security, "Server built");

        Ok(ServerHandle {
            shape: self.shape,
            security: self.security,
            router,
            settings: ConnectionSettings::from_options(&options),
            tls: TlsSource::from_options(&options),
        })
    }
}

/// A built, not yet listening server.
#[derive(Debug)]
pub struct ServerHandle {
    shape: ServerShape,
    security: Security,
    router: Router,
    settings: ConnectionSettings,
    tls: Option<TlsSource>,
}

impl ServerHandle {
    pub fn shape(&self) -> ServerShape {
        self.shape
    }

    /// How the shape's security was decided, for startup logs.
    pub fn security(&self) -> Security {
        self.security
    }

    pub fn is_secure(&self) -> bool {
        self.shape.is_secure()
    }

    /// The catch-all router.
    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn into_router(self) -> Router {
        self.router
    }

    /// Wrap the router, e.g. with middleware that runs before the flow.
    pub fn map_router(mut self, f: impl FnOnce(Router) -> Router) -> Self {
        self.router = f(self.router);
        self
    }

    /// Bind `host:port` and serve in a background task.
    pub async fn listen(self, host: &str, port: u16) -> Result<RunningServer, ListenError> {
        self.listen_with(host, port, DEFAULT_BACKLOG).await
    }

    /// Like [`listen`](Self::listen), with an explicit accept backlog.
    pub async fn listen_with(self, host: &str, port: u16, backlog: u32) -> Result<RunningServer, ListenError> {
        let acceptor = self.acceptor().await?;
        let listener = Listener::bind_with_backlog(host, port, backlog, self.settings.max_connections).await?;
        let local_addr = listener
            .local_addr()
            .map_err(ListenerError::Accept)?;

        let (stop, stopped) = oneshot::channel();
        let tracker = ConnectionTracker::new();
        // A dropped sender stops the loop with no drain time.
        let stop_requested = async move { stopped.await.unwrap_or(Duration::ZERO) };
        let task = tokio::spawn(self.accept_loop(listener, local_addr, acceptor, stop_requested, tracker.clone()));

        Ok(RunningServer {
            local_addr,
            stop,
            tracker,
            task,
        })
    }

    /// Serve on an already bound socket until `shutdown` fires, then give
    /// open connections up to `drain` to finish.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
        drain: Duration,
    ) -> Result<(), ListenError> {
        let acceptor = self.acceptor().await?;
        let local_addr = listener.local_addr().map_err(ListenerError::Accept)?;
        let listener = Listener::from_tcp(listener, self.settings.max_connections);
        let stop_requested = async move {
            let _ = shutdown.recv().await;
            drain
        };
        self.accept_loop(listener, local_addr, acceptor, stop_requested, ConnectionTracker::new())
            .await
    }

    async fn acceptor(&self) -> Result<Acceptor, ListenError> {
        if !self.shape.is_secure() {
            return Ok(Acceptor::Plain);
        }
        let source = self.tls.as_ref().ok_or(ListenError::MissingCertificate)?;
        self.tls_acceptor(source).await
    }

    #[cfg(feature = "tls")]
    async fn tls_acceptor(&self, source: &TlsSource) -> Result<Acceptor, ListenError> {
        let alpn = crate::net::tls::alpn_protocols(self.shape, self.settings.allow_http1);
        let config = crate::net::tls::load_tls_config(source, alpn)
            .await
            .map_err(ListenError::Tls)?;
        Ok(Acceptor::Tls(axum_server::tls_rustls::RustlsAcceptor::new(config)))
    }

    #[cfg(not(feature = "tls"))]
    async fn tls_acceptor(&self, _source: &TlsSource) -> Result<Acceptor, ListenError> {
        Err(ListenError::TlsUnsupported)
    }

    async fn accept_loop(
        self,
        listener: Listener,
        local_addr: SocketAddr,
        acceptor: Acceptor,
        stop_requested: impl Future<Output = Duration>,
        tracker: ConnectionTracker,
    ) -> Result<(), ListenError> {
        let protocol = ConnectionProtocol::for_shape(self.shape, self.settings.allow_http1);
        tracing::info!(
            address = %local_addr,
            shape = ?self.shape,
            protocol = ?protocol,
            max_connections = listener.max_connections(),
            "Server listening"
        );

        let (stopping_tx, stopping) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(stop_requested);

        let drain = loop {
            let (stream, peer_addr, permit) = tokio::select! {
                drain = &mut stop_requested => break drain,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(ListenerError::Closed) => break Duration::ZERO,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            };

            let guard = tracker.track();
            let router = self.router.clone();
            let acceptor = acceptor.clone();
            let settings = self.settings.clone();
            let stopping = stopping.clone();

            connections.spawn(async move {
                let _permit = permit;
                let connection_id = guard.id();
                tracing::debug!(%connection_id, %peer_addr, "Serving connection");
                if let Err(e) = acceptor.handle(stream, protocol, router, &settings, stopping).await {
                    tracing::debug!(%connection_id, %peer_addr, error = %e, "Connection ended with error");
                }
                drop(guard);
            });
        };

        drop(listener);
        tracing::info!(address = %local_addr, open = connections.len(), "Server stopped accepting connections");

        let _ = stopping_tx.send(true);
        let drained = tokio::time::timeout(drain, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining = connections.len(), "Closing connections still open after drain timeout");
            connections.shutdown().await;
        }
        Ok(())
    }
}

/// A server accepting connections in the background.
///
/// Dropping it stops the accept loop and closes open connections without
/// waiting for them.
#[derive(Debug)]
pub struct RunningServer {
    local_addr: SocketAddr,
    stop: oneshot::Sender<Duration>,
    tracker: ConnectionTracker,
    task: JoinHandle<Result<(), ListenError>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Stop accepting and ask open connections to close once their
    /// in-flight requests finish. Connections still open after `drain`
    /// are dropped.
    pub async fn shutdown(self, drain: Duration) -> Result<(), ListenError> {
        // The loop may already have exited on its own.
        let _ = self.stop.send(drain);
        self.task.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::options;

    #[test]
    fn version_from_number() {
        assert_eq!(HttpVersion::try_from(1).unwrap(), HttpVersion::Http1);
        assert_eq!(HttpVersion::try_from(2).unwrap(), HttpVersion::Http2);
        assert!(matches!(
            HttpVersion::try_from(3),
            Err(BuildError::UnsupportedHttpVersion(3))
        ));
    }

    #[test]
    fn defaults_to_plain_http1() {
        let (shape, security) = resolve_shape(None, None, &ServerOptions::new());
        assert_eq!(shape, ServerShape::Http1);
        assert_eq!(security, Security::Inferred(false));
    }

    #[test]
    fn explicit_secure_wins_over_options() {
        let tls_options = ServerOptions::new().with(options::CERT, "cert.pem");

        let (shape, security) = resolve_shape(None, Some(false), &tls_options);
        assert_eq!(shape, ServerShape::Http1);
        assert_eq!(security, Security::Explicit(false));

        let (shape, security) = resolve_shape(Some(HttpVersion::Http2), Some(true), &ServerOptions::new());
        assert_eq!(shape, ServerShape::Http2Tls);
        assert_eq!(security, Security::Explicit(true));
    }

    #[test]
    fn tls_keys_imply_secure() {
        let options = ServerOptions::new().with("key", "key.pem").with("keep_alive", true);
        let (shape, security) = resolve_shape(Some(HttpVersion::Http1), None, &options);
        assert_eq!(shape, ServerShape::Http1Tls);
        assert_eq!(security, Security::Inferred(true));
    }

    #[test]
    fn cert_alone_implies_secure() {
        let options = ServerOptions::new().with(options::CERT, "cert.pem");

        let (shape, security) = resolve_shape(None, None, &options);
        assert_eq!(shape, ServerShape::Http1Tls);
        assert_eq!(security, Security::Inferred(true));

        let (shape, _) = resolve_shape(Some(HttpVersion::Http2), None, &options);
        assert_eq!(shape, ServerShape::Http2Tls);
    }

    #[test]
    fn non_tls_keys_stay_plain() {
        let options = ServerOptions::new().with("keep_alive", true).with("max_connections", 5);
        let (shape, _) = resolve_shape(Some(HttpVersion::Http2), None, &options);
        assert_eq!(shape, ServerShape::Http2);
    }

    #[test]
    fn http2_only_keys_count_only_for_http2() {
        for key in HTTP2_ONLY_TLS_KEYS {
            let options = ServerOptions::new().with(*key, true);
            assert_eq!(resolve_shape(Some(HttpVersion::Http1), None, &options).0, ServerShape::Http1);
            assert_eq!(resolve_shape(Some(HttpVersion::Http2), None, &options).0, ServerShape::Http2Tls);
        }
    }

    #[test]
    fn http1_list_is_subset_of_http2_list() {
        for key in HTTP1_TLS_KEYS {
            assert!(is_tls_key(HttpVersion::Http1, key));
            assert!(is_tls_key(HttpVersion::Http2, key));
        }
    }

    #[cfg(feature = "http2")]
    #[test]
    fn build_exposes_shape_and_router() {
        let server = create_server::<String, ()>(
            ServerCreationOptions::new(Vec::new()).with_http_version(HttpVersion::Http2),
        )
        .unwrap();

        assert_eq!(server.shape(), ServerShape::Http2);
        assert!(!server.is_secure());
        let _router: Router = server.into_router();
    }

    #[cfg(not(feature = "http2"))]
    #[test]
    fn http2_shapes_fail_to_build_without_http2_support() {
        let err = create_server::<String, ()>(
            ServerCreationOptions::new(Vec::new()).with_http_version(HttpVersion::Http2),
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::Http2Unsupported));

        let http1 = create_server::<String, ()>(ServerCreationOptions::new(Vec::new())).unwrap();
        assert_eq!(http1.shape(), ServerShape::Http1);
    }

    #[cfg(not(feature = "tls"))]
    #[test]
    fn secure_shapes_fail_to_build_without_tls_support() {
        let err = create_server::<String, ()>(ServerCreationOptions::new(Vec::new()).with_secure(true)).unwrap_err();
        assert!(matches!(err, BuildError::TlsUnsupported));
    }

    #[cfg(feature = "tls")]
    #[tokio::test]
    async fn secure_without_material_fails_before_binding() {
        let server = create_server::<String, ()>(ServerCreationOptions::new(Vec::new()).with_secure(true)).unwrap();
        assert!(server.is_secure());

        let err = server.listen("127.0.0.1", 0).await.unwrap_err();
        assert!(matches!(err, ListenError::MissingCertificate));
    }

    #[tokio::test]
    async fn listen_and_shutdown() {
        let server = create_server::<String, ()>(ServerCreationOptions::new(Vec::new())).unwrap();
        let running = server.listen("127.0.0.1", 0).await.unwrap();

        assert_ne!(running.local_addr().port(), 0);
        running.shutdown(Duration::from_millis(200)).await.unwrap();
    }

    #[tokio::test]
    async fn listen_with_explicit_backlog() {
        let server = create_server::<String, ()>(ServerCreationOptions::new(Vec::new())).unwrap();
        let running = server.listen_with("127.0.0.1", 0, 8).await.unwrap();

        let _client = tokio::net::TcpStream::connect(running.local_addr()).await.unwrap();
        running.shutdown(Duration::from_millis(200)).await.unwrap();
    }

    #[tokio::test]
    async fn serve_returns_once_shutdown_is_triggered() {
        let server = create_server::<String, ()>(ServerCreationOptions::new(Vec::new())).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = crate::lifecycle::Shutdown::new();

        let serving = tokio::spawn(server.serve(listener, shutdown.subscribe(), Duration::from_millis(200)));
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(2), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
