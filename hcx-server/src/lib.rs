//! # HyperCourier Reference Peer
//!
//! Purpose: A small HTTP/1.1 server, plain or TLS, that serves canned
//! responses. It gives the client crate a real peer to talk to in tests and
//! demos.
//!
//! ## Design Principles
//! 1. **Table Dispatch**: Requests are matched on `(method, path)`; anything
//!    else gets a 404.
//! 2. **One Loop, Two Streams**: The connection loop is generic over the
//!    stream, so TCP and TLS share it.
//! 3. **Counted, not Logged**: Connections, requests, and protocol errors are
//!    tallied in atomic counters for assertions.

mod error;
mod routes;
mod server;
mod stats;

pub use error::{PeerError, PeerResult};
pub use routes::{Handler, Routes};
pub use server::{handle_connection, tls_config, Peer};
pub use stats::{PeerSnapshot, PeerStats};
