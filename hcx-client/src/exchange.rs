//! # Request/Response Exchange
//!
//! Purpose: Run one write-request/read-response cycle over any byte stream.
//! Both client variants and both query modes go through these routines.
//!
//! ## Design Principles
//! 1. **Stream Agnostic**: Generic over `AsyncRead`/`AsyncWrite`, so TCP, TLS,
//!    and in-memory mocks share one code path.
//! 2. **Write Gates Read**: A failed write returns before any read is issued.
//! 3. **Single Buffer**: The request is encoded once into a `BytesMut` and
//!    written with `write_all`.

use std::io;

use bytes::BytesMut;
use http::Method;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use hcx_common::{encode_request, Request, Response, ResponseParser, TransportError, TransportResult};

use crate::observer::{QueryObserver, Stage};

/// Buffer sizing and body limits applied while reading a response.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeLimits {
    pub read_buffer_capacity: usize,
    pub max_response_bytes: usize,
}

impl Default for ExchangeLimits {
    fn default() -> Self {
        ExchangeLimits {
            read_buffer_capacity: 8 * 1024,
            max_response_bytes: hcx_common::DEFAULT_MAX_BODY,
        }
    }
}

/// Encodes and writes the full request, then flushes.
///
/// A request that cannot be encoded fails with `InvalidInput` before any
/// byte reaches the stream.
pub async fn write_request<S>(stream: &mut S, request: &Request) -> io::Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let mut out = BytesMut::new();
    encode_request(request, &mut out)?;
    stream.write_all(&out).await?;
    stream.flush().await
}

/// Reads until one complete response for a `method` request is decoded.
pub async fn read_response<S>(
    stream: &mut S,
    method: &Method,
    limits: &ExchangeLimits,
) -> io::Result<Response>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut buffer = BytesMut::with_capacity(limits.read_buffer_capacity);
    let mut parser = ResponseParser::new(method).with_limit(limits.max_response_bytes);
    loop {
        if let Some(response) = parser.parse(&mut buffer)? {
            return Ok(response);
        }
        if stream.read_buf(&mut buffer).await? == 0 {
            return Ok(parser.finish()?);
        }
    }
}

/// Writes `request` and reads its response, reporting each phase to `observer`.
pub async fn exchange<S>(
    stream: &mut S,
    request: &Request,
    limits: &ExchangeLimits,
    observer: &dyn QueryObserver,
) -> TransportResult<Response>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    if let Err(err) = write_request(stream, request).await {
        let err = TransportError::Write(err);
        observer.failed(Stage::Write, &err);
        return Err(err);
    }
    observer.request_sent(request);

    match read_response(stream, &request.method, limits).await {
        Ok(response) => {
            observer.response_received(&response);
            Ok(response)
        }
        Err(err) => {
            let err = TransportError::Read(err);
            observer.failed(Stage::Read, &err);
            Err(err)
        }
    }
}
