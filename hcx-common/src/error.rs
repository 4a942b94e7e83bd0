//! # Error Taxonomy
//!
//! Purpose: Name every way a connection or an exchange can fail, so callers
//! can tell a DNS problem from a refused socket or a broken read.
//!
//! ## Design Principles
//! 1. **Phase-Scoped Variants**: Each failure names the phase it happened in
//!    (resolve, connect, handshake, write, read, shutdown).
//! 2. **Source Preservation**: I/O failures keep the underlying `io::Error`.
//! 3. **Cheap Matching**: `ErrorKind` mirrors the variants without payloads.

use std::io;

use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by the client transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Host name could not be resolved to any socket address.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolution {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    /// No resolved address accepted the TCP connection.
    #[error("failed to connect to {host}:{port}: {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    /// TLS negotiation failed, including an unusable SNI host name.
    #[error("tls handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: io::Error,
    },
    /// Sending the request failed.
    #[error("failed to write request: {0}")]
    Write(#[source] io::Error),
    /// Receiving or decoding the response failed.
    #[error("failed to read response: {0}")]
    Read(#[source] io::Error),
    /// Closing the transport failed. Logged only, never returned by `disconnect`.
    #[error("failed to shut down transport: {0}")]
    Shutdown(#[source] io::Error),
    /// `connect` was called on a client that already holds a transport.
    #[error("client is already connected")]
    AlreadyConnected,
    /// A query was issued on a client without a transport.
    #[error("client is not connected")]
    NotConnected,
    /// The pending operation was abandoned because the client disconnected.
    #[error("operation cancelled by disconnect")]
    Cancelled,
    /// A blocking call was made from a thread owned by the async runtime.
    #[error("blocking call issued from inside the async runtime")]
    BlockingContext,
    /// A blocking call was made against a current-thread runtime, which
    /// cannot make progress unless its owner drives it.
    #[error("blocking calls require a multi-thread runtime")]
    UnsupportedRuntime,
}

/// Payload-free discriminant of [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Resolution,
    Connection,
    Handshake,
    Write,
    Read,
    Shutdown,
    AlreadyConnected,
    NotConnected,
    Cancelled,
    BlockingContext,
    UnsupportedRuntime,
}

impl TransportError {
    /// Returns the variant as a fieldless kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Resolution { .. } => ErrorKind::Resolution,
            TransportError::Connection { .. } => ErrorKind::Connection,
            TransportError::Handshake { .. } => ErrorKind::Handshake,
            TransportError::Write(_) => ErrorKind::Write,
            TransportError::Read(_) => ErrorKind::Read,
            TransportError::Shutdown(_) => ErrorKind::Shutdown,
            TransportError::AlreadyConnected => ErrorKind::AlreadyConnected,
            TransportError::NotConnected => ErrorKind::NotConnected,
            TransportError::Cancelled => ErrorKind::Cancelled,
            TransportError::BlockingContext => ErrorKind::BlockingContext,
            TransportError::UnsupportedRuntime => ErrorKind::UnsupportedRuntime,
        }
    }

    /// Underlying I/O error, when the failure came from the socket.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            TransportError::Resolution { source, .. }
            | TransportError::Connection { source, .. }
            | TransportError::Handshake { source, .. } => Some(source),
            TransportError::Write(err)
            | TransportError::Read(err)
            | TransportError::Shutdown(err) => Some(err),
            _ => None,
        }
    }
}

/// HTTP/1.1 framing errors raised by the codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The message head is not valid HTTP/1.x.
    #[error("malformed message head: {0}")]
    Head(#[from] httparse::Error),
    /// More headers than the parser accepts.
    #[error("too many headers (limit {0})")]
    TooManyHeaders(usize),
    /// A header value was not valid for its field.
    #[error("invalid header: {0}")]
    Header(String),
    /// A chunk size line or chunk terminator was malformed.
    #[error("invalid chunked encoding")]
    Chunk,
    /// The message exceeded the configured size limit.
    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },
    /// The peer closed the stream before the message was complete.
    #[error("connection closed before message completed")]
    UnexpectedEof,
    /// The request target is empty or contains whitespace or control bytes.
    #[error("invalid request target")]
    Target,
    /// The message uses framing this codec does not implement.
    #[error("unsupported framing: {0}")]
    Unsupported(&'static str),
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        let kind = match err {
            CodecError::UnexpectedEof => io::ErrorKind::UnexpectedEof,
            CodecError::Target => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}
