//! # HTTP/1.1 Encoding and Parsing
//!
//! Purpose: Turn `Request`/`Response` values into wire bytes and back, on top
//! of `httparse` for head tokenising.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: Parsers consume from a caller-owned `BytesMut`
//!    and return `Ok(None)` until a whole message is buffered.
//! 2. **Framing by the Book**: Response bodies are delimited by
//!    `transfer-encoding: chunked`, `content-length`, or connection close, in
//!    that order of precedence.
//! 3. **Bounded Memory**: Bodies larger than the configured limit fail fast.
//! 4. **Fail Fast**: Malformed framing returns a `CodecError` immediately.

use std::fmt::Write as _;

use bytes::{Buf, BytesMut};
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, Version};

use crate::error::CodecError;
use crate::types::{Request, Response};

/// Maximum number of headers accepted in one message head.
pub const MAX_HEADERS: usize = 64;

/// Default upper bound for a decoded body (16 MiB).
pub const DEFAULT_MAX_BODY: usize = 16 * 1024 * 1024;

/// Upper bound for a message head, and separately for chunked trailers.
pub const MAX_HEAD: usize = 64 * 1024;

/// Longest chunk-size line tolerated before the framing is declared invalid.
const MAX_CHUNK_LINE: usize = 1024;

/// Serializes a request head and body into `out`.
///
/// A `content-length` header is added when the body is non-empty and the
/// caller supplied neither `content-length` nor `transfer-encoding`. Targets
/// containing whitespace or control bytes are rejected before anything is
/// written to `out`.
pub fn encode_request(request: &Request, out: &mut BytesMut) -> Result<(), CodecError> {
    if request.target.is_empty()
        || request
            .target
            .bytes()
            .any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(CodecError::Target);
    }
    out.reserve(64 + request.target.len() + request.body.len());
    out.extend_from_slice(request.method.as_str().as_bytes());
    out.extend_from_slice(b" ");
    out.extend_from_slice(request.target.as_bytes());
    out.extend_from_slice(b" ");
    out.extend_from_slice(version_str(request.version).as_bytes());
    out.extend_from_slice(b"\r\n");
    encode_headers(&request.headers, out);
    if !request.body.is_empty() && !has_framing(&request.headers) {
        push_content_length(out, request.body.len());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&request.body);
    Ok(())
}

/// Serializes a response head and body into `out`, always framed by length.
pub fn encode_response(response: &Response, out: &mut BytesMut) {
    out.reserve(64 + response.body.len());
    out.extend_from_slice(version_str(response.version).as_bytes());
    let _ = write!(out, " {} {}\r\n", response.status, response.reason);
    encode_headers(&response.headers, out);
    if !response.headers.contains_key(CONTENT_LENGTH) {
        push_content_length(out, response.body.len());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&response.body);
}

fn encode_headers(headers: &HeaderMap, out: &mut BytesMut) {
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

fn push_content_length(out: &mut BytesMut, len: usize) {
    let _ = write!(out, "content-length: {len}\r\n");
}

fn has_framing(headers: &HeaderMap) -> bool {
    headers.contains_key(CONTENT_LENGTH) || headers.contains_key(TRANSFER_ENCODING)
}

fn version_str(version: Version) -> &'static str {
    if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else if version == Version::HTTP_09 {
        "HTTP/0.9"
    } else {
        "HTTP/1.1"
    }
}

fn version_from_minor(minor: Option<u8>) -> Version {
    match minor {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    }
}

fn collect_headers(raw: &[httparse::Header<'_>]) -> Result<HeaderMap, CodecError> {
    let mut headers = HeaderMap::with_capacity(raw.len());
    for header in raw {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|err| CodecError::Header(err.to_string()))?;
        let value =
            HeaderValue::from_bytes(header.value).map_err(|err| CodecError::Header(err.to_string()))?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn content_length(headers: &HeaderMap) -> Result<Option<usize>, CodecError> {
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .map(Some)
        .ok_or_else(|| CodecError::Header("invalid content-length".to_string()))
}

fn is_chunked(headers: &HeaderMap) -> bool {
    // Only the final coding decides the framing.
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .last()
        .map(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
        .unwrap_or(false)
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|window| window == b"\r\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Length(usize),
    Chunked(ChunkState),
    UntilEof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(usize),
    DataEnd,
    Trailers,
}

#[derive(Debug)]
enum ParseState {
    Head,
    Body(BodyKind),
    Done,
}

/// Incremental HTTP/1.x response parser.
///
/// One parser decodes one response. Interim `1xx` responses (other than
/// `101`) are skipped transparently.
#[derive(Debug)]
pub struct ResponseParser {
    state: ParseState,
    head_request: bool,
    max_body: usize,
    head: Option<Response>,
    body: BytesMut,
    trailer_len: usize,
}

impl ResponseParser {
    /// Creates a parser for the response to a request made with `method`.
    ///
    /// Responses to `HEAD` never carry a body regardless of their headers.
    pub fn new(method: &Method) -> Self {
        ResponseParser {
            state: ParseState::Head,
            head_request: method == Method::HEAD,
            max_body: DEFAULT_MAX_BODY,
            head: None,
            body: BytesMut::new(),
            trailer_len: 0,
        }
    }

    /// Overrides the maximum accepted body size.
    pub fn with_limit(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Consumes bytes from `buf` and returns the response once complete.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Response>, CodecError> {
        loop {
            match self.state {
                ParseState::Head => {
                    if !self.parse_head(buf)? {
                        return Ok(None);
                    }
                }
                ParseState::Body(kind) => {
                    return if self.parse_body(kind, buf)? {
                        Ok(Some(self.take()))
                    } else {
                        Ok(None)
                    };
                }
                ParseState::Done => {
                    return Ok(if self.head.is_some() {
                        Some(self.take())
                    } else {
                        None
                    });
                }
            }
        }
    }

    /// Signals end-of-stream. Only close-delimited bodies complete here.
    pub fn finish(&mut self) -> Result<Response, CodecError> {
        match self.state {
            ParseState::Body(BodyKind::UntilEof) => Ok(self.take()),
            _ => Err(CodecError::UnexpectedEof),
        }
    }

    fn parse_head(&mut self, buf: &mut BytesMut) -> Result<bool, CodecError> {
        let (consumed, head) = {
            let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut parsed = httparse::Response::new(&mut raw);
            let consumed = match parsed.parse(&buf[..]) {
                Ok(httparse::Status::Complete(consumed)) => consumed,
                Ok(httparse::Status::Partial) => {
                    check_head_len(buf.len())?;
                    return Ok(false);
                }
                Err(httparse::Error::TooManyHeaders) => {
                    return Err(CodecError::TooManyHeaders(MAX_HEADERS))
                }
                Err(err) => return Err(err.into()),
            };
            check_head_len(consumed)?;
            let head = Response {
                status: parsed.code.unwrap_or_default(),
                reason: parsed.reason.unwrap_or_default().to_string(),
                version: version_from_minor(parsed.version),
                headers: collect_headers(parsed.headers)?,
                body: Default::default(),
            };
            (consumed, head)
        };
        buf.advance(consumed);

        let status = head.status;
        if (100..200).contains(&status) && status != 101 {
            // Interim response; the final one follows on the same stream.
            return Ok(true);
        }

        let kind = if self.head_request || status < 200 || status == 204 || status == 304 {
            None
        } else if is_chunked(&head.headers) {
            Some(BodyKind::Chunked(ChunkState::Size))
        } else if let Some(len) = content_length(&head.headers)? {
            if len > self.max_body {
                return Err(CodecError::TooLarge {
                    limit: self.max_body,
                });
            }
            Some(BodyKind::Length(len))
        } else {
            Some(BodyKind::UntilEof)
        };

        self.head = Some(head);
        self.state = match kind {
            Some(BodyKind::Length(0)) | None => ParseState::Done,
            Some(kind) => ParseState::Body(kind),
        };
        Ok(true)
    }

    fn parse_body(&mut self, kind: BodyKind, buf: &mut BytesMut) -> Result<bool, CodecError> {
        match kind {
            BodyKind::Length(remaining) => {
                let take = remaining.min(buf.len());
                self.body.extend_from_slice(&buf.split_to(take));
                let remaining = remaining - take;
                self.state = ParseState::Body(BodyKind::Length(remaining));
                Ok(remaining == 0)
            }
            BodyKind::UntilEof => {
                self.check_limit(buf.len())?;
                self.body.extend_from_slice(&buf.split());
                Ok(false)
            }
            BodyKind::Chunked(state) => self.parse_chunked(state, buf),
        }
    }

    fn parse_chunked(&mut self, mut state: ChunkState, buf: &mut BytesMut) -> Result<bool, CodecError> {
        loop {
            match state {
                ChunkState::Size => {
                    let Some(pos) = find_crlf(buf) else {
                        if buf.len() > MAX_CHUNK_LINE {
                            return Err(CodecError::Chunk);
                        }
                        break;
                    };
                    let line = buf.split_to(pos + 2);
                    let size = parse_chunk_size(&line[..pos])?;
                    if size == 0 {
                        state = ChunkState::Trailers;
                    } else {
                        self.check_limit(size)?;
                        state = ChunkState::Data(size);
                    }
                }
                ChunkState::Data(remaining) => {
                    if buf.is_empty() {
                        break;
                    }
                    let take = remaining.min(buf.len());
                    self.body.extend_from_slice(&buf.split_to(take));
                    state = if remaining == take {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(remaining - take)
                    };
                }
                ChunkState::DataEnd => {
                    if buf.len() < 2 {
                        break;
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(CodecError::Chunk);
                    }
                    buf.advance(2);
                    state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let Some(pos) = find_crlf(buf) else {
                        check_head_len(self.trailer_len + buf.len())?;
                        break;
                    };
                    self.trailer_len += pos + 2;
                    check_head_len(self.trailer_len)?;
                    buf.advance(pos + 2);
                    if pos == 0 {
                        return Ok(true);
                    }
                }
            }
        }
        self.state = ParseState::Body(BodyKind::Chunked(state));
        Ok(false)
    }

    fn check_limit(&self, incoming: usize) -> Result<(), CodecError> {
        if self.body.len().saturating_add(incoming) > self.max_body {
            return Err(CodecError::TooLarge {
                limit: self.max_body,
            });
        }
        Ok(())
    }

    fn take(&mut self) -> Response {
        self.state = ParseState::Done;
        let mut response = self.head.take().unwrap_or_default();
        response.body = std::mem::take(&mut self.body).freeze();
        response
    }
}

fn check_head_len(len: usize) -> Result<(), CodecError> {
    if len > MAX_HEAD {
        return Err(CodecError::TooLarge { limit: MAX_HEAD });
    }
    Ok(())
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, CodecError> {
    // Chunk extensions after ';' are ignored.
    let digits = line.split(|&b| b == b';').next().unwrap_or_default();
    let digits = std::str::from_utf8(digits).map_err(|_| CodecError::Chunk)?.trim();
    if digits.is_empty() {
        return Err(CodecError::Chunk);
    }
    usize::from_str_radix(digits, 16).map_err(|_| CodecError::Chunk)
}

/// Request parser used by the server side of an exchange.
///
/// Bodies must be framed by `content-length`; chunked uploads are rejected.
#[derive(Debug)]
pub struct RequestParser {
    max_body: usize,
}

impl Default for RequestParser {
    fn default() -> Self {
        RequestParser::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        RequestParser {
            max_body: DEFAULT_MAX_BODY,
        }
    }

    pub fn with_limit(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Splits one complete request off the front of `buf`, if buffered.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Request>, CodecError> {
        let (head_len, mut request) = {
            let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut parsed = httparse::Request::new(&mut raw);
            let head_len = match parsed.parse(&buf[..]) {
                Ok(httparse::Status::Complete(len)) => len,
                Ok(httparse::Status::Partial) => {
                    check_head_len(buf.len())?;
                    return Ok(None);
                }
                Err(httparse::Error::TooManyHeaders) => {
                    return Err(CodecError::TooManyHeaders(MAX_HEADERS))
                }
                Err(err) => return Err(err.into()),
            };
            let method = Method::from_bytes(parsed.method.unwrap_or_default().as_bytes())
                .map_err(|_| CodecError::Head(httparse::Error::Token))?;
            let mut request = Request::new(method, parsed.path.unwrap_or("/"));
            request.version = version_from_minor(parsed.version);
            request.headers = collect_headers(parsed.headers)?;
            (head_len, request)
        };

        if is_chunked(&request.headers) {
            return Err(CodecError::Unsupported("chunked request body"));
        }
        let body_len = content_length(&request.headers)?.unwrap_or(0);
        if body_len > self.max_body {
            return Err(CodecError::TooLarge {
                limit: self.max_body,
            });
        }
        if buf.len() < head_len + body_len {
            return Ok(None);
        }

        buf.advance(head_len);
        request.body = buf.split_to(body_len).freeze();
        Ok(Some(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn parse_all(method: &Method, raw: &[u8]) -> Result<Option<Response>, CodecError> {
        let mut buf = BytesMut::from(raw);
        ResponseParser::new(method).parse(&mut buf)
    }

    #[test]
    fn encodes_request_with_length() {
        let request = Request::new(Method::POST, "/items")
            .with_header("Host", "example.test")
            .unwrap()
            .with_body("hello");
        let mut out = BytesMut::new();
        encode_request(&request, &mut out).unwrap();
        assert_eq!(
            &out[..],
            b"POST /items HTTP/1.1\r\nhost: example.test\r\ncontent-length: 5\r\n\r\nhello"
        );
    }

    #[test]
    fn encodes_bodyless_request_without_length() {
        let request = Request::get("/ping");
        let mut out = BytesMut::new();
        encode_request(&request, &mut out).unwrap();
        assert_eq!(&out[..], b"GET /ping HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn target_with_line_break_is_not_encoded() {
        let mut out = BytesMut::new();
        for target in ["/a\r\nX-Injected: 1", "/a\nb", "/a b", ""] {
            let request = Request::get(target);
            assert!(matches!(
                encode_request(&request, &mut out),
                Err(CodecError::Target)
            ));
        }
        assert!(out.is_empty());
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut raw = b"HTTP/1.1 200 OK\r\nX-Big: ".to_vec();
        raw.resize(MAX_HEAD + 1, b'a');
        assert!(matches!(
            parse_all(&Method::GET, &raw),
            Err(CodecError::TooLarge { limit: MAX_HEAD })
        ));

        // Just under the limit is still waiting for more bytes.
        raw.truncate(MAX_HEAD);
        assert!(parse_all(&Method::GET, &raw).unwrap().is_none());
    }

    #[test]
    fn oversized_trailers_are_rejected() {
        let mut buf = BytesMut::from(
            &b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n0\r\n"[..],
        );
        let mut parser = ResponseParser::new(&Method::GET);
        assert!(parser.parse(&mut buf).unwrap().is_none());

        // Many short trailer lines add up against the same limit.
        let line = b"X-Trailer: abcdefghijklmnopqrstuvwxyz\r\n";
        let mut result = Ok(None);
        for _ in 0..=MAX_HEAD / line.len() {
            buf.extend_from_slice(line);
            result = parser.parse(&mut buf);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(CodecError::TooLarge { limit: MAX_HEAD })));
    }

    #[test]
    fn request_parser_bounds_partial_head() {
        let mut raw = b"GET /".to_vec();
        raw.resize(MAX_HEAD + 1, b'a');
        let mut buf = BytesMut::from(&raw[..]);
        assert!(matches!(
            RequestParser::new().parse(&mut buf),
            Err(CodecError::TooLarge { .. })
        ));
    }

    #[test]
    fn parses_content_length_response() {
        let response = parse_all(
            &Method::GET,
            b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nX-Test: yes\r\n\r\npong",
        )
        .unwrap()
        .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.reason, "OK");
        assert_eq!(response.header("x-test"), Some("yes"));
        assert_eq!(&response.body[..], b"pong");
    }

    #[test]
    fn waits_for_partial_body() {
        let mut parser = ResponseParser::new(&Method::GET);
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\npo"[..]);
        assert!(parser.parse(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"ng");
        let response = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(&response.body[..], b"pong");
        assert!(buf.is_empty());
    }

    #[test]
    fn parses_chunked_body_across_reads() {
        let mut parser = ResponseParser::new(&Method::GET);
        let mut buf = BytesMut::from(
            &b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4;ext=1\r\nWiki\r\n5\r\npe"[..],
        );
        assert!(parser.parse(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"dia\r\n0\r\nX-Trailer: t\r\n\r\n");
        let response = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(&response.body[..], b"Wikipedia");
    }

    #[test]
    fn rejects_bad_chunk_size() {
        let err = parse_all(
            &Method::GET,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n",
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::Chunk));
    }

    #[test]
    fn close_delimited_body_completes_on_finish() {
        let mut parser = ResponseParser::new(&Method::GET);
        let mut buf = BytesMut::from(&b"HTTP/1.0 200 OK\r\n\r\nstream"[..]);
        assert!(parser.parse(&mut buf).unwrap().is_none());
        let response = parser.finish().unwrap();
        assert_eq!(response.version, Version::HTTP_10);
        assert_eq!(&response.body[..], b"stream");
    }

    #[test]
    fn finish_before_head_is_eof() {
        let mut parser = ResponseParser::new(&Method::GET);
        assert!(matches!(parser.finish(), Err(CodecError::UnexpectedEof)));
    }

    #[test]
    fn head_and_no_content_have_no_body() {
        let response = parse_all(&Method::HEAD, b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n")
            .unwrap()
            .unwrap();
        assert!(response.body.is_empty());

        let response = parse_all(&Method::DELETE, b"HTTP/1.1 204 No Content\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(response.status_code(), Some(StatusCode::NO_CONTENT));
    }

    #[test]
    fn skips_interim_continue() {
        let response = parse_all(
            &Method::POST,
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok",
        )
        .unwrap()
        .unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(&response.body[..], b"ok");
    }

    #[test]
    fn enforces_body_limit() {
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n"[..]);
        let err = ResponseParser::new(&Method::GET)
            .with_limit(10)
            .parse(&mut buf)
            .unwrap_err();
        assert!(matches!(err, CodecError::TooLarge { limit: 10 }));
    }

    #[test]
    fn rejects_garbage_head() {
        assert!(matches!(
            parse_all(&Method::GET, b"NOT HTTP AT ALL\r\n\r\n"),
            Err(CodecError::Head(_))
        ));
    }

    #[test]
    fn request_parser_splits_pipelined_requests() {
        let mut buf = BytesMut::from(
            &b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /b HTTP/1.1\r\nHost: x\r\n\r\n"[..],
        );
        let mut parser = RequestParser::new();
        let first = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(first.method, Method::POST);
        assert_eq!(first.target, "/a");
        assert_eq!(&first.body[..], b"abc");
        let second = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(second.target, "/b");
        assert!(parser.parse(&mut buf).unwrap().is_none());
    }

    #[test]
    fn request_parser_rejects_chunked_upload() {
        let mut buf =
            BytesMut::from(&b"POST /a HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n"[..]);
        assert!(matches!(
            RequestParser::new().parse(&mut buf),
            Err(CodecError::Unsupported(_))
        ));
    }

    #[test]
    fn encoded_response_is_parseable() {
        let original = Response::new(StatusCode::OK, "pong")
            .with_header("content-type", "text/plain")
            .unwrap();
        let mut out = BytesMut::new();
        encode_response(&original, &mut out);
        assert!(out.starts_with(b"HTTP/1.1 200 OK\r\n"));
        let parsed = ResponseParser::new(&Method::GET)
            .parse(&mut out)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.header("content-type"), Some("text/plain"));
        assert_eq!(&parsed.body[..], b"pong");
    }
}
