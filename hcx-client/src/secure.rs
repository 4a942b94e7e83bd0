//! # HTTPS Client
//!
//! Purpose: `Client` over TLS, port 443 by default.
//!
//! ## Notes
//! - The TLS context is built once per client from `ClientConfig::tls`.
//! - The endpoint host doubles as the SNI name and, in strict mode, the name
//!   the certificate is checked against.
//! - Peer verification is disabled unless `VerifyMode::Strict` is selected.

use std::io;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use hcx_common::{ClientState, Endpoint, Request, Response, TransportError, TransportResult};

use crate::client::{Client, QueryCallback};
use crate::config::ClientConfig;
use crate::observer::{QueryObserver, Stage, TracingObserver};
use crate::session::{ensure_blocking_allowed, reject, Session};
use crate::transport::{is_peer_closed, open_tcp};

/// HTTPS client bound to one host and port.
pub struct SecureClient {
    endpoint: Endpoint,
    config: ClientConfig,
    connector: TlsConnector,
    runtime: Handle,
    observer: Arc<dyn QueryObserver>,
    session: Option<Session<TlsStream<TcpStream>>>,
}

impl SecureClient {
    pub const DEFAULT_PORT: u16 = 443;

    pub fn new(host: impl Into<String>, port: u16, runtime: Handle) -> TransportResult<Self> {
        Self::with_config(host, port, runtime, ClientConfig::default())
    }

    pub fn with_config(
        host: impl Into<String>,
        port: u16,
        runtime: Handle,
        config: ClientConfig,
    ) -> TransportResult<Self> {
        let endpoint = Endpoint::new(host, port);
        let tls = config.tls.build().map_err(|err| TransportError::Handshake {
            host: endpoint.host().to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, err),
        })?;

        Ok(SecureClient {
            endpoint,
            config,
            connector: TlsConnector::from(tls),
            runtime,
            observer: Arc::new(TracingObserver),
            session: None,
        })
    }

    /// Replaces the diagnostics sink. Applies to the next connection.
    pub fn with_observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.observer = observer;
        self
    }

    async fn open(&self) -> TransportResult<TlsStream<TcpStream>> {
        let host = self.endpoint.host();
        let handshake_error = |source: io::Error| TransportError::Handshake {
            host: host.to_string(),
            source,
        };

        let name = ServerName::try_from(host.to_string())
            .map_err(|err| handshake_error(io::Error::new(io::ErrorKind::InvalidInput, err)))
            .inspect_err(|err| self.observer.failed(Stage::Handshake, err))?;

        let tcp = open_tcp(&self.endpoint, &self.config)
            .await
            .inspect_err(|err| self.observer.failed(Stage::Connect, err))?;

        self.connector
            .connect(name, tcp)
            .await
            .map_err(handshake_error)
            .inspect_err(|err| self.observer.failed(Stage::Handshake, err))
    }
}

impl Client for SecureClient {
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

        let stream = self.runtime.block_on(self.open())?;
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
            session.teardown(&self.endpoint, is_peer_closed);
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

impl Drop for SecureClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use hcx_common::ErrorKind;

    #[derive(Default)]
    struct Failures(Mutex<Vec<Stage>>);

    impl QueryObserver for Failures {
        fn failed(&self, stage: Stage, _error: &TransportError) {
            self.0.lock().unwrap().push(stage);
        }
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn invalid_sni_name_fails_handshake() {
        let rt = runtime();
        let failures = Arc::new(Failures::default());
        let mut client = SecureClient::new("bad host name", 443, rt.handle().clone())
            .unwrap()
            .with_observer(failures.clone());
        let err = client.connect().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Handshake);
        assert!(!client.is_connected());
        assert_eq!(*failures.0.lock().unwrap(), vec![Stage::Handshake]);
    }

    #[test]
    fn current_thread_runtime_is_rejected() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut client = SecureClient::new("localhost", 443, rt.handle().clone()).unwrap();
        let err = client.connect().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedRuntime);
        assert!(!client.is_connected());
    }

    #[test]
    fn starts_disconnected() {
        let rt = runtime();
        let client = SecureClient::new("localhost", SecureClient::DEFAULT_PORT, rt.handle().clone())
            .unwrap();
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(client.endpoint().port(), 443);
    }
}
