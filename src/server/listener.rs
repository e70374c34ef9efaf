//! Listener and per-connection serving

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::{http1, http2};
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::shutdown::{Shutdown, ShutdownSignal};
use crate::stats::{ServerStats, StatsSnapshot};
use crate::{BloatError, Result};

use super::connection_limit::ConnectionLimit;
use super::router::Router;
use super::tls::{self, ALPN_H2};
use super::SHUTDOWN_TIMEOUT_MS;

/// Bound server, ready to accept connections
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    limit: ConnectionLimit,
    router: Arc<Router>,
    shutdown: Shutdown,
    stats: Arc<ServerStats>,
}

/// Control handle for a running [`Server`]
#[derive(Debug, Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Shutdown,
    stats: Arc<ServerStats>,
}

impl ServerHandle {
    /// Address the server is listening on
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and end all download streams
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Current traffic counters
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Server {
    /// Validate `config`, load TLS material and bind the listener
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, TLS material cannot
    /// be loaded or the address cannot be bound
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;

        let tls = config
            .server
            .tls
            .as_ref()
            .map(|tls_config| tls::load_acceptor(tls_config, config.server.http2))
            .transpose()?;

        let addr = config.server.listen_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            BloatError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to bind {addr}: {e}"),
            ))
        })?;
        let local_addr = listener.local_addr()?;

        let shutdown = Shutdown::new();
        let stats = Arc::new(ServerStats::new());
        let router = Router::new(&config, Arc::clone(&stats), shutdown.subscribe());

        Ok(Self {
            listener,
            local_addr,
            tls,
            limit: ConnectionLimit::new(config.server.max_connections),
            router: Arc::new(router),
            shutdown,
            stats,
        })
    }

    /// Address the listener is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for stopping the server and reading its counters
    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            local_addr: self.local_addr,
            shutdown: self.shutdown.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Serve until Ctrl-C or [`ServerHandle::shutdown`]
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; per-connection failures are logged
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut connections = JoinSet::new();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        info!(
            "Listening on {}://{}",
            if self.tls.is_some() { "https" } else { "http" },
            self.local_addr
        );

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let Some(permit) = self.limit.try_admit(peer) else {
                                warn!("Connection limit reached, rejecting {}", peer);
                                drop(stream);
                                continue;
                            };

                            let tls = self.tls.clone();
                            let router = Arc::clone(&self.router);
                            let signal = self.shutdown.subscribe();

                            connections.spawn(async move {
                                let _permit = permit;
                                if let Err(e) = serve_connection(stream, tls, router, signal).await {
                                    debug!("Connection {} ended with error: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                () = shutdown_rx.triggered() => {
                    info!("Received shutdown signal");
                    break;
                }
                _ = &mut ctrl_c => {
                    info!("Received SIGINT, shutting down");
                    self.shutdown.trigger();
                    break;
                }
            }

            while connections.try_join_next().is_some() {}
        }

        // Stop accepting before draining
        drop(self.listener);

        let shutdown_timeout = Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
        let drained = tokio::time::timeout(shutdown_timeout, async {
            while let Some(result) = connections.join_next().await {
                if let Err(e) = result {
                    warn!("Connection task failed: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} connections still open after {:?}, aborting",
                connections.len(),
                shutdown_timeout
            );
            connections.shutdown().await;
        }

        let stats = self.stats.snapshot();
        info!(
            "Shutdown complete: {} download sessions ({} bytes sent), {} uploads accepted ({} bytes), {} rejected, {} probes",
            stats.download_sessions,
            stats.bytes_sent,
            stats.uploads_accepted,
            stats.bytes_absorbed,
            stats.uploads_rejected,
            stats.probes
        );
        Ok(())
    }
}

/// Serve one accepted connection, negotiating TLS and HTTP version
async fn serve_connection(
    stream: TcpStream,
    tls: Option<TlsAcceptor>,
    router: Arc<Router>,
    signal: ShutdownSignal,
) -> Result<()> {
    // Probe round trips must not wait on Nagle
    stream.set_nodelay(true)?;

    let Some(acceptor) = tls else {
        return serve_http1(TokioIo::new(stream), router, signal).await;
    };

    let stream = acceptor
        .accept(stream)
        .await
        .map_err(|e| BloatError::Tls(format!("Handshake failed: {e}")))?;

    let negotiated_h2 = stream.get_ref().1.alpn_protocol() == Some(ALPN_H2);
    if negotiated_h2 {
        serve_http2(TokioIo::new(stream), router, signal).await
    } else {
        serve_http1(TokioIo::new(stream), router, signal).await
    }
}

async fn serve_http1<I>(io: TokioIo<I>, router: Arc<Router>, mut signal: ShutdownSignal) -> Result<()>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request: Request<Incoming>| {
        let router = Arc::clone(&router);
        async move { Ok::<_, Infallible>(router.route(request).await) }
    });

    let conn = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        () = signal.triggered() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    result.map_err(|e| BloatError::Other(format!("HTTP/1 connection error: {e}")))
}

async fn serve_http2<I>(io: TokioIo<I>, router: Arc<Router>, mut signal: ShutdownSignal) -> Result<()>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request: Request<Incoming>| {
        let router = Arc::clone(&router);
        async move { Ok::<_, Infallible>(router.route(request).await) }
    });

    let conn = http2::Builder::new(TokioExecutor::new()).serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        () = signal.triggered() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    result.map_err(|e| BloatError::Other(format!("HTTP/2 connection error: {e}")))
}
