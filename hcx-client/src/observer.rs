//! # Diagnostics Observer
//!
//! Purpose: Report lifecycle and exchange events to whatever sink the caller
//! injects, keeping the transport free of logging globals.
//!
//! ## Design Principles
//! 1. **Observer Pattern**: Clients hold an `Arc<dyn QueryObserver>` and call
//!    it at connect, disconnect, request-sent, response-received, and failure.
//! 2. **Opt-In Hooks**: Every method has an empty default.
//! 3. **Structured Output**: `TracingObserver` emits `tracing` events with
//!    named fields instead of preformatted strings.

use hcx_common::{Endpoint, Request, Response, TransportError};

/// Phase in which a failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    Handshake,
    Write,
    Read,
    Shutdown,
}

/// Receives transport events. Implementations must be cheap and non-blocking;
/// they run on the caller's thread or on a runtime worker.
pub trait QueryObserver: Send + Sync {
    fn connected(&self, _endpoint: &Endpoint) {}

    fn disconnected(&self, _endpoint: &Endpoint) {}

    fn request_sent(&self, _request: &Request) {}

    fn response_received(&self, _response: &Response) {}

    fn failed(&self, _stage: Stage, _error: &TransportError) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl QueryObserver for NoopObserver {}

/// Forwards events to the `tracing` subscriber installed by the application.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl QueryObserver for TracingObserver {
    fn connected(&self, endpoint: &Endpoint) {
        tracing::debug!(host = endpoint.host(), port = endpoint.port(), "connected");
    }

    fn disconnected(&self, endpoint: &Endpoint) {
        tracing::debug!(host = endpoint.host(), port = endpoint.port(), "disconnecting");
    }

    fn request_sent(&self, request: &Request) {
        tracing::debug!(
            method = %request.method,
            target = %request.target,
            body_len = request.body.len(),
            "query sent"
        );
    }

    fn response_received(&self, response: &Response) {
        tracing::debug!(
            status = response.status,
            body_len = response.body.len(),
            "response received"
        );
    }

    fn failed(&self, stage: Stage, error: &TransportError) {
        match stage {
            // Teardown failures never reach the caller.
            Stage::Shutdown => tracing::warn!(?stage, %error, "transport shutdown failed"),
            _ => tracing::error!(?stage, %error, "transport failure"),
        }
    }
}
