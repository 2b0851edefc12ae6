// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTPS listener for the API router.
//
// The accept loop hands each TCP connection to its own task.  With TLS
// configured, the first byte of every connection is peeked: a TLS
// handshake record (0x16) proceeds to the handshake, anything else is a
// plaintext client and receives a single `400` explaining that the agent
// only speaks HTTPS.  The TLS acceptor sits behind `TlsReloader` so a
// renewed certificate applies to new connections without a restart.
//
// hyper-util's auto builder negotiates HTTP/1.1 or HTTP/2 (ALPN under TLS).

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use printflow_core::error::{PrintflowError, Result};

use crate::error::ApiErrorResponse;

/// First byte of a TLS handshake record.
const TLS_HANDSHAKE: u8 = 0x16;

/// Time a client gets to start and finish the TLS handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long open connections may drain after shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed `accept` (e.g. descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Swappable TLS acceptor.
#[derive(Clone)]
pub struct TlsReloader {
    current: Arc<RwLock<TlsAcceptor>>,
}

impl TlsReloader {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            current: Arc::new(RwLock::new(TlsAcceptor::from(config))),
        }
    }

    /// Use `config` for every connection accepted from now on.
    pub fn replace(&self, config: Arc<ServerConfig>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = TlsAcceptor::from(config);
        info!("TLS certificate reloaded");
    }

    fn acceptor(&self) -> TlsAcceptor {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// The bound API listener.
pub struct Gateway {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
    tls: Option<TlsReloader>,
    cancel: CancellationToken,
    active_connections: Arc<AtomicU32>,
}

impl Gateway {
    /// Bind `addr`.  Port 0 picks a free port; see [`Gateway::local_addr`].
    ///
    /// `tls: None` serves plain HTTP and is only meant for the operator's
    /// explicit plaintext opt-in.
    ///
    /// # Errors
    ///
    /// A `Configuration` error when the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        router: Router,
        tls: Option<TlsReloader>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| PrintflowError::Configuration(format!("cannot bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| PrintflowError::Configuration(format!("listener address: {e}")))?;

        if tls.is_some() {
            info!(%local_addr, "HTTPS listener bound");
        } else {
            warn!(%local_addr, "plain HTTP listener bound; traffic is NOT encrypted");
        }

        Ok(Self {
            listener,
            local_addr,
            router,
            tls,
            cancel,
            active_connections: Arc::new(AtomicU32::new(0)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Accept connections until the cancellation token fires, then give
    /// open connections a short window to finish.
    pub async fn serve(self) {
        let connections = TaskTracker::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("accept loop received shutdown signal");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "incoming connection");
                        let router = self.router.clone();
                        let tls = self.tls.as_ref().map(TlsReloader::acceptor);
                        let cancel = self.cancel.clone();
                        let active = Arc::clone(&self.active_connections);
                        connections.spawn(async move {
                            active.fetch_add(1, Ordering::Relaxed);
                            if let Err(e) = handle_connection(stream, peer, router, tls, cancel).await {
                                debug!(%peer, error = %e, "connection ended with error");
                            }
                            active.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(self.listener);
        connections.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, connections.wait())
            .await
            .is_err()
        {
            warn!(
                open = self.active_connections.load(Ordering::Relaxed),
                "connections still open after drain timeout"
            );
        }
        info!(addr = %self.local_addr, "listener stopped");
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    tls: Option<TlsAcceptor>,
    cancel: CancellationToken,
) -> io::Result<()> {
    let Some(acceptor) = tls else {
        return serve_io(TokioIo::new(stream), router, cancel).await;
    };

    match peek_first_byte(&stream).await? {
        None => return Ok(()),
        Some(TLS_HANDSHAKE) => {}
        Some(_) => {
            info!(%peer, "rejected plaintext request");
            return reject_plaintext(stream).await;
        }
    }

    let tls_stream = tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"))??;
    serve_io(TokioIo::new(tls_stream), router, cancel).await
}

async fn serve_io<I>(io: TokioIo<I>, router: Router, cancel: CancellationToken) -> io::Result<()>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, TowerToHyperService::new(router));
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => result.map_err(io::Error::other),
        _ = cancel.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await.map_err(io::Error::other)
        }
    }
}

/// `None` when the client closed without sending anything.
async fn peek_first_byte(stream: &TcpStream) -> io::Result<Option<u8>> {
    let mut first = [0u8; 1];
    let read = tokio::time::timeout(HANDSHAKE_TIMEOUT, stream.peek(&mut first))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "client sent nothing"))??;
    Ok((read > 0).then_some(first[0]))
}

/// Answer a plaintext client with a `400` and close.
async fn reject_plaintext(mut stream: TcpStream) -> io::Result<()> {
    // Consume the request head so closing does not reset the connection
    // before the client reads the answer.
    let mut discard = [0u8; 8192];
    let _ = tokio::time::timeout(Duration::from_millis(200), stream.read(&mut discard)).await;

    let body = serde_json::to_string(&ApiErrorResponse {
        error: "InvalidRequest".into(),
        message: "this agent only accepts HTTPS; use an https:// URL".into(),
    })
    .map_err(io::Error::other)?;
    let response = format!(
        "HTTP/1.1 400 Bad Request\r\n\
         content-type: application/json\r\n\
         content-length: {}\r\n\
         connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;

    let _ = tokio::time::timeout(Duration::from_millis(200), async {
        while matches!(stream.read(&mut discard).await, Ok(n) if n > 0) {}
    })
    .await;
    Ok(())
}
