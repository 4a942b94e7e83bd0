//! # Byte Transports
//!
//! Purpose: Open TCP connections to an endpoint and define how each stream
//! type is torn down.
//!
//! ## Design Principles
//! 1. **Try Every Address**: Resolution may yield several addresses; each is
//!    attempted in order and the last failure is reported.
//! 2. **Stream-Specific Close**: TCP shuts down both directions, TLS sends
//!    `close_notify` first.

use std::future::Future;
use std::io;
use std::net::Shutdown;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use hcx_common::{Endpoint, TransportError, TransportResult};

use crate::config::ClientConfig;

/// A connected byte stream that a session can run exchanges over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Consumes the stream and closes it.
    fn close(self) -> impl Future<Output = io::Result<()>> + Send;
}

impl Transport for TcpStream {
    async fn close(self) -> io::Result<()> {
        self.into_std()?.shutdown(Shutdown::Both)
    }
}

impl Transport for TlsStream<TcpStream> {
    async fn close(mut self) -> io::Result<()> {
        self.shutdown().await
    }
}

/// True for errors meaning the peer already went away, which makes a close
/// redundant rather than failed.
pub(crate) fn is_peer_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected
    )
}

/// Resolves `endpoint` and connects to the first address that accepts.
pub(crate) async fn open_tcp(endpoint: &Endpoint, config: &ClientConfig) -> TransportResult<TcpStream> {
    let host = endpoint.host();
    let port = endpoint.port();

    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| TransportError::Resolution {
            host: host.to_string(),
            port,
            source,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(TransportError::Resolution {
            host: host.to_string(),
            port,
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
        });
    }

    let mut last_err = None;
    for addr in addrs {
        let attempt = match config.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, TcpStream::connect(addr)).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
            },
            None => TcpStream::connect(addr).await,
        };
        match attempt {
            Ok(stream) => {
                stream.set_nodelay(config.nodelay).map_err(|source| TransportError::Connection {
                    host: host.to_string(),
                    port,
                    source,
                })?;
                return Ok(stream);
            }
            Err(err) => {
                tracing::trace!(%addr, error = %err, "connect attempt failed");
                last_err = Some(err);
            }
        }
    }

    Err(TransportError::Connection {
        host: host.to_string(),
        port,
        source: last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no address attempted")),
    })
}
