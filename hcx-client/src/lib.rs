//! # HyperCourier Client
//!
//! Purpose: Open a connection to one HTTP peer, send a request, and hand back
//! the response, either blocking the caller or through a completion callback.
//!
//! ## Design Principles
//! 1. **Capability Trait**: `Client` is implemented by `PlainClient` and
//!    `SecureClient`, which differ only in stream type and handshake.
//! 2. **Shared Exchange**: Both variants run the same generic write/read
//!    routines over any `AsyncRead + AsyncWrite` stream.
//! 3. **One Peer per Client**: The endpoint is fixed at construction; talk to a
//!    different host with a different client.
//! 4. **Observable, not Global**: Diagnostics go through an injected
//!    `QueryObserver` instead of a process-wide logger.

mod client;
mod config;
mod exchange;
mod observer;
mod plain;
mod secure;
mod session;
mod tls;
mod transport;

pub use client::{Client, QueryCallback};
pub use config::{ClientConfig, TlsOptions, VerifyMode};
pub use exchange::{exchange, read_response, write_request, ExchangeLimits};
pub use observer::{NoopObserver, QueryObserver, Stage, TracingObserver};
pub use plain::PlainClient;
pub use secure::SecureClient;
pub use transport::Transport;

pub use hcx_common::{
    ClientState, Endpoint, ErrorKind, Request, Response, TransportError, TransportResult,
};
