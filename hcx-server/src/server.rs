//! # Peer Server
//!
//! Accept HTTP/1.1 connections, plain or TLS, parse requests, and answer
//! them from a `Handler`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use http::header::{CONNECTION, CONTENT_LENGTH};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use hcx_common::{encode_response, Request, RequestParser, Response};

use crate::error::{PeerError, PeerResult};
use crate::routes::Handler;
use crate::stats::{PeerSnapshot, PeerStats};

/// Serves requests from one connection until the client closes it, asks for
/// `connection: close`, or sends something unparseable.
pub async fn handle_connection<S>(stream: S, handler: &dyn Handler, stats: &PeerStats) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = stream;
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut out = BytesMut::new();
    let mut parser = RequestParser::new();

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            break;
        }

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(request)) => {
                    stats.record_request();
                    let response = respond(handler, &request);
                    out.clear();
                    encode_response(&response, &mut out);
                    stream.write_all(&out).await?;
                    if wants_close(&request.headers) || wants_close(&response.headers) {
                        stream.shutdown().await?;
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    stats.record_protocol_error();
                    tracing::debug!(error = %err, "rejecting malformed request");
                    out.clear();
                    encode_response(&Response::new(StatusCode::BAD_REQUEST, "bad request"), &mut out);
                    stream.write_all(&out).await?;
                    stream.shutdown().await?;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

fn respond(handler: &dyn Handler, request: &Request) -> Response {
    let mut response = handler.handle(request);
    if request.method == Method::HEAD {
        // Keep the advertised length, send no body.
        if !response.headers.contains_key(CONTENT_LENGTH) {
            response
                .headers
                .insert(CONTENT_LENGTH, HeaderValue::from(response.body.len()));
        }
        response.body = bytes::Bytes::new();
    }
    response
}

fn wants_close(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("close"))
}

/// Builds a TLS server context from a certificate chain and its private key.
pub fn tls_config(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> PeerResult<Arc<ServerConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    Ok(Arc::new(config))
}

async fn stopped(mut flag: watch::Receiver<bool>) {
    loop {
        if *flag.borrow_and_update() {
            return;
        }
        if flag.changed().await.is_err() {
            return;
        }
    }
}

/// Decrements the active-connection gauge however the task ends.
struct OpenConnection<'a>(&'a PeerStats);

impl<'a> OpenConnection<'a> {
    fn new(stats: &'a PeerStats) -> Self {
        stats.record_connection_open();
        OpenConnection(stats)
    }
}

impl Drop for OpenConnection<'_> {
    fn drop(&mut self) {
        self.0.record_connection_close();
    }
}

/// A running peer bound to a local address.
///
/// The accept loop and every connection task run on the runtime that was
/// current when the peer was bound. Dropping the peer shuts it down.
pub struct Peer {
    local_addr: SocketAddr,
    stats: Arc<PeerStats>,
    stop: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl Peer {
    /// Serves plain HTTP on `addr` (use port 0 for an ephemeral port).
    pub async fn bind_plain(addr: &str, handler: impl Handler) -> PeerResult<Peer> {
        let listener = bind(addr).await?;
        Peer::start(listener, None, Arc::new(handler))
    }

    /// Serves HTTPS on `addr` with the given server context.
    pub async fn bind_tls(
        addr: &str,
        handler: impl Handler,
        config: Arc<ServerConfig>,
    ) -> PeerResult<Peer> {
        let listener = bind(addr).await?;
        Peer::start(listener, Some(TlsAcceptor::from(config)), Arc::new(handler))
    }

    fn start(
        listener: TcpListener,
        acceptor: Option<TlsAcceptor>,
        handler: Arc<dyn Handler>,
    ) -> PeerResult<Peer> {
        let local_addr = listener.local_addr().map_err(|source| PeerError::Bind {
            addr: "<listener>".to_string(),
            source,
        })?;
        let stats = Arc::new(PeerStats::new());
        let (stop, stop_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            acceptor,
            handler,
            Arc::clone(&stats),
            stop_rx,
        ));
        tracing::debug!(%local_addr, "peer listening");

        Ok(Peer {
            local_addr,
            stats,
            stop,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn stats(&self) -> PeerSnapshot {
        self.stats.snapshot()
    }

    /// Stops accepting and closes every open connection.
    pub fn shutdown(&self) {
        self.stop.send_replace(true);
    }

    /// True once the accept loop has exited.
    pub fn is_finished(&self) -> bool {
        self.accept_task.is_finished()
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn bind(addr: &str) -> PeerResult<TcpListener> {
    TcpListener::bind(addr).await.map_err(|source| PeerError::Bind {
        addr: addr.to_string(),
        source,
    })
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    handler: Arc<dyn Handler>,
    stats: Arc<PeerStats>,
    stop: watch::Receiver<bool>,
) {
    loop {
        let (socket, remote) = tokio::select! {
            _ = stopped(stop.clone()) => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let handler = Arc::clone(&handler);
        let stats = Arc::clone(&stats);
        let stop = stop.clone();
        tokio::spawn(async move {
            let served = serve(socket, acceptor, handler.as_ref(), &stats);
            tokio::select! {
                _ = stopped(stop) => {}
                result = served => {
                    if let Err(err) = result {
                        tracing::debug!(%remote, error = %err, "connection ended with error");
                    }
                }
            }
        });
    }
    tracing::debug!("peer stopped accepting");
}

async fn serve(
    socket: TcpStream,
    acceptor: Option<TlsAcceptor>,
    handler: &dyn Handler,
    stats: &PeerStats,
) -> io::Result<()> {
    match acceptor {
        Some(acceptor) => {
            let stream = acceptor.accept(socket).await?;
            let _open = OpenConnection::new(stats);
            handle_connection(stream, handler, stats).await
        }
        None => {
            let _open = OpenConnection::new(stats);
            handle_connection(socket, handler, stats).await
        }
    }
}
