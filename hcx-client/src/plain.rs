//! # Plain HTTP Client
//!
//! Purpose: `Client` over an unencrypted TCP connection, port 80 by default.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::runtime::Handle;

use hcx_common::{ClientState, Endpoint, Request, Response, TransportError, TransportResult};

use crate::client::{Client, QueryCallback};
use crate::config::ClientConfig;
use crate::observer::{QueryObserver, Stage, TracingObserver};
use crate::session::{ensure_blocking_allowed, reject, Session};
use crate::transport::open_tcp;

/// HTTP client bound to one host and port.
///
/// All I/O is driven by the runtime behind `runtime`. Blocking calls need a
/// multi-thread runtime and fail with `UnsupportedRuntime` otherwise.
pub struct PlainClient {
    endpoint: Endpoint,
    config: ClientConfig,
    runtime: Handle,
    observer: Arc<dyn QueryObserver>,
    session: Option<Session<TcpStream>>,
}

impl PlainClient {
    pub const DEFAULT_PORT: u16 = 80;

    pub fn new(host: impl Into<String>, port: u16, runtime: Handle) -> Self {
        Self::with_config(host, port, runtime, ClientConfig::default())
    }

    pub fn with_config(
        host: impl Into<String>,
        port: u16,
        runtime: Handle,
        config: ClientConfig,
    ) -> Self {
        PlainClient {
            endpoint: Endpoint::new(host, port),
            config,
            runtime,
            observer: Arc::new(TracingObserver),
            session: None,
        }
    }

    /// Replaces the diagnostics sink. Applies to the next connection.
    pub fn with_observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.observer = observer;
        self
    }
}

impl Client for PlainClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn state(&self) -> ClientState {
        match self.session {
            Some(_) => ClientState::Connected,
            None => ClientState::Disconnected,
        }
    }

    fn connect(&mut self) -> TransportResult<()> {
        if self.session.is_some() {
            return Err(TransportError::AlreadyConnected);
        }
        ensure_blocking_allowed(&self.runtime)?;

        let stream = self
            .runtime
            .block_on(open_tcp(&self.endpoint, &self.config))
            .inspect_err(|err| self.observer.failed(Stage::Connect, err))?;

        self.session = Some(Session::new(
            stream,
            self.runtime.clone(),
            Arc::clone(&self.observer),
            self.config.limits(),
        ));
        self.observer.connected(&self.endpoint);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            // A reset or already-closed socket is still a shutdown failure here.
            session.teardown(&self.endpoint, |_| false);
        }
    }

    fn query(&self, request: &Request) -> TransportResult<Response> {
        match &self.session {
            Some(session) => session.query(request),
            None => Err(TransportError::NotConnected),
        }
    }

    fn query_async(&self, request: Arc<Request>, callback: QueryCallback) {
        match &self.session {
            Some(session) => session.query_async(request, callback),
            None => reject(&self.runtime, callback, TransportError::NotConnected),
        }
    }
}

impl Drop for PlainClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
