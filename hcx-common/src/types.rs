//! # Message and Endpoint Types
//!
//! Plain values exchanged across the transport boundary. The transport never
//! builds or rewrites a request; it only serializes what the caller handed it.
//!
//! ## Design Principles
//! 1. **Owned Data**: `Bytes` bodies and `HeaderMap` headers so values can move
//!    freely between threads and outlive the call that produced them.
//! 2. **Explicit Sentinel**: `Response::default()` is the "no response" value
//!    delivered next to an error (status 0, nothing else).
//! 3. **Standard Vocabulary**: method, version, and header types come from the
//!    `http` crate.

use std::fmt;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Version};

/// Remote peer a client is bound to for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    /// DNS name or address literal, also used as the TLS server name.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Connection state of a client. There is no observable "connecting" phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Disconnected,
    Connected,
}

/// An HTTP request as handed to the transport.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Request target, usually an origin-form path such as `/ping?x=1`.
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Request {
    /// Creates an HTTP/1.1 request without headers or body.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Request {
            method,
            target: target.into(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Request::new(Method::GET, target)
    }

    /// Appends a header. Invalid names or values are rejected.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, http::Error> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:?} ({} headers, {} body bytes)",
            self.method,
            self.target,
            self.version,
            self.headers.len(),
            self.body.len()
        )
    }
}

/// An HTTP response read from the transport.
#[derive(Debug, Clone)]
pub struct Response {
    /// Numeric status; `0` only for the empty sentinel.
    pub status: u16,
    pub reason: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Default for Response {
    fn default() -> Self {
        Response {
            status: 0,
            reason: String::new(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

impl Response {
    /// Builds a response with the canonical reason phrase for `status`.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Response {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// True for the sentinel returned when no real response was obtained.
    pub fn is_empty(&self) -> bool {
        self.status == 0
    }

    /// Typed status, or `None` for the sentinel or out-of-range codes.
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.status).ok()
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, http::Error> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// First value of `name` as UTF-8, if present and printable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "<no response>");
        }
        write!(
            f,
            "{:?} {} {} ({} headers, {} body bytes)",
            self.version,
            self.status,
            self.reason,
            self.headers.len(),
            self.body.len()
        )
    }
}
