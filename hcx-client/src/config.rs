//! # Client Configuration
//!
//! Purpose: Collect the knobs a client needs at construction time, with
//! defaults that match a plain one-shot HTTP exchange.
//!
//! ## Notes
//! - No timeout applies to queries; `connect_timeout` covers the TCP connect
//!   phase only.
//! - TLS peer verification is **disabled** by default. This accepts any
//!   certificate and is a known hardening item; switch to `VerifyMode::Strict`
//!   for untrusted networks.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::CertificateDer;

use crate::exchange::ExchangeLimits;
use crate::tls;

/// Certificate verification policy for the TLS transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyMode {
    /// Accept any server certificate.
    #[default]
    Disabled,
    /// Validate the chain against the webpki roots plus `extra_roots`, and the
    /// server name against the endpoint host.
    Strict,
}

/// TLS context settings for `SecureClient`.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub verify: VerifyMode,
    /// Additional trust anchors, e.g. a private CA or a self-signed peer.
    pub extra_roots: Vec<CertificateDer<'static>>,
}

impl TlsOptions {
    pub fn strict() -> Self {
        TlsOptions {
            verify: VerifyMode::Strict,
            extra_roots: Vec::new(),
        }
    }

    /// Adds a trusted root certificate (DER encoded).
    pub fn trust(mut self, cert: CertificateDer<'static>) -> Self {
        self.extra_roots.push(cert);
        self
    }

    /// Builds the rustls client context (TLS 1.2 minimum, ring provider).
    pub fn build(&self) -> Result<Arc<rustls::ClientConfig>, rustls::Error> {
        tls::client_config(self).map(Arc::new)
    }
}

/// Configuration shared by both client variants.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Optional bound on the TCP connect phase.
    pub connect_timeout: Option<Duration>,
    /// Disable Nagle's algorithm on the socket.
    pub nodelay: bool,
    /// Initial capacity of the per-read response buffer.
    pub read_buffer_capacity: usize,
    /// Largest response body accepted before the read fails.
    pub max_response_bytes: usize,
    /// TLS settings; ignored by `PlainClient`.
    pub tls: TlsOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout: None,
            nodelay: true,
            read_buffer_capacity: 8 * 1024,
            max_response_bytes: hcx_common::DEFAULT_MAX_BODY,
            tls: TlsOptions::default(),
        }
    }
}

impl ClientConfig {
    pub(crate) fn limits(&self) -> ExchangeLimits {
        ExchangeLimits {
            read_buffer_capacity: self.read_buffer_capacity,
            max_response_bytes: self.max_response_bytes,
        }
    }
}
