//! # Client Contract
//!
//! Purpose: Expose one lifecycle and query API for both the plain and the TLS
//! transport, so callers can hold either behind `Box<dyn Client>`.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: Implementors hide resolution, handshakes, and framing.
//! 2. **Atomic Connect**: `connect` either fully succeeds or leaves the client
//!    disconnected.
//! 3. **Best-Effort Teardown**: `disconnect` never fails and is idempotent.
//! 4. **Exactly-Once Completion**: Async queries report through an `FnOnce`.

use std::sync::Arc;

use hcx_common::{ClientState, Endpoint, Request, Response, TransportError, TransportResult};

/// Completion handler for [`Client::query_async`].
///
/// Receives the parsed response and `None`, or the empty sentinel response and
/// the error that prevented a real one.
pub type QueryCallback = Box<dyn FnOnce(Response, Option<TransportError>) + Send + 'static>;

/// Connection lifecycle and query operations shared by every transport.
pub trait Client {
    /// Peer this client is bound to.
    fn endpoint(&self) -> &Endpoint;

    fn state(&self) -> ClientState;

    fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Resolves the host and establishes the transport.
    ///
    /// Fails with `AlreadyConnected` when a transport is already open, with
    /// `BlockingContext` when called from a runtime thread, and with
    /// `UnsupportedRuntime` when the client was given a current-thread runtime.
    fn connect(&mut self) -> TransportResult<()>;

    /// Releases the transport. Shutdown failures are reported to the observer
    /// only; the client is always disconnected afterwards.
    fn disconnect(&mut self);

    /// Sends `request` and blocks until the full response has been read.
    fn query(&self, request: &Request) -> TransportResult<Response>;

    /// Sends `request` without blocking; `callback` runs once on the runtime
    /// when the exchange completes, fails, or is cancelled by `disconnect`.
    fn query_async(&self, request: Arc<Request>, callback: QueryCallback);
}
