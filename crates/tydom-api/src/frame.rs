// HTTP-over-WebSocket frame codec.
//
// The gateway speaks a fixed HTTP/1.1 subset inside WebSocket payloads:
// outgoing commands are requests with an exact header layout, incoming
// payloads are either responses (`HTTP/1.1 200 OK`) or gateway-initiated
// requests. Serialization is byte-exact; parsing is tolerant only in the
// ways the decoder can recover from (it turns parse failures into raw
// messages instead of killing the pipeline).

use std::collections::HashMap;

use thiserror::Error;

/// Parse failure for an incoming frame.
///
/// Carried into `Raw { parse_error }` by the message decoder rather than
/// propagated -- a malformed frame must never end the stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameParseError {
    #[error("empty frame")]
    Empty,

    #[error("frame head is not valid UTF-8")]
    InvalidHeadEncoding,

    #[error("missing header terminator")]
    MissingHeaderTerminator,

    #[error("invalid start line: {0}")]
    InvalidStartLine(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("body shorter than Content-Length ({expected} > {actual})")]
    TruncatedBody { expected: usize, actual: usize },
}

// ── Headers ─────────────────────────────────────────────────────────

/// Case-insensitive header map.
///
/// Names are normalized to lowercase on insert so downstream lookups
/// never have to rebrand header names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ── HttpFrame ───────────────────────────────────────────────────────

/// A parsed HTTP frame from the gateway wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpFrame {
    Request {
        method: String,
        path: String,
        headers: Headers,
        body: Option<Vec<u8>>,
    },
    Response {
        status: u16,
        reason: Option<String>,
        headers: Headers,
        body: Option<Vec<u8>>,
    },
}

impl HttpFrame {
    pub fn headers(&self) -> &Headers {
        match self {
            Self::Request { headers, .. } | Self::Response { headers, .. } => headers,
        }
    }

    pub fn body(&self) -> Option<&[u8]> {
        match self {
            Self::Request { body, .. } | Self::Response { body, .. } => body.as_deref(),
        }
    }

    /// The resource that produced this frame.
    ///
    /// Responses carry it in the custom `Uri-Origin` header; requests use
    /// their own path.
    pub fn uri_origin(&self) -> Option<&str> {
        match self {
            Self::Request { path, .. } => Some(path.as_str()),
            Self::Response { headers, .. } => headers.get("Uri-Origin"),
        }
    }

    /// The correlation id echoed back by the gateway.
    pub fn transac_id(&self) -> Option<&str> {
        self.headers().get("Transac-Id")
    }
}

// ── Serialization ───────────────────────────────────────────────────

/// Serialize an outgoing command frame.
///
/// Header order is fixed by the gateway protocol: `Content-Length`,
/// `Content-Type`, `Transac-Id`, blank line. A body is followed by a
/// trailing CRLF CRLF.
pub fn serialize_command(
    method: &str,
    path: &str,
    body: Option<&str>,
    transac_id: &str,
) -> String {
    let content_length = body.map(str::len).unwrap_or(0);
    let mut frame = format!(
        "{method} {path} HTTP/1.1\r\n\
         Content-Length: {content_length}\r\n\
         Content-Type: application/json; charset=UTF-8\r\n\
         Transac-Id: {transac_id}\r\n\
         \r\n"
    );
    if let Some(body) = body {
        frame.push_str(body);
        frame.push_str("\r\n\r\n");
    }
    frame
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Parse an incoming frame into an [`HttpFrame`].
///
/// Accepts a response (`HTTP/1.1 <status> <reason>`) or a request
/// (`<method> <path> HTTP/1.1`). If `Content-Length` is present, exactly
/// that many body bytes are read; otherwise the remainder (if any)
/// becomes the body.
pub fn parse_frame(payload: &[u8]) -> Result<HttpFrame, FrameParseError> {
    if payload.is_empty() {
        return Err(FrameParseError::Empty);
    }

    let (head, rest) = split_head(payload)?;
    let head = std::str::from_utf8(head).map_err(|_| FrameParseError::InvalidHeadEncoding)?;

    let mut lines = head.split("\r\n");
    let start_line = lines.next().unwrap_or_default();

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameParseError::MalformedHeader(line.to_owned()))?;
        headers.insert(name.trim(), value.trim().to_owned());
    }

    let body = read_body(&headers, rest)?;

    if let Some(status_part) = start_line.strip_prefix("HTTP/1.1 ") {
        let mut parts = status_part.splitn(2, ' ');
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| FrameParseError::InvalidStartLine(start_line.to_owned()))?;
        let reason = parts
            .next()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_owned);
        return Ok(HttpFrame::Response {
            status,
            reason,
            headers,
            body,
        });
    }

    let mut parts = start_line.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(path), Some("HTTP/1.1")) if !method.is_empty() => {
            Ok(HttpFrame::Request {
                method: method.to_owned(),
                path: path.to_owned(),
                headers,
                body,
            })
        }
        _ => Err(FrameParseError::InvalidStartLine(start_line.to_owned())),
    }
}

/// Split the payload at the first blank line into (head, body bytes).
fn split_head(payload: &[u8]) -> Result<(&[u8], &[u8]), FrameParseError> {
    let sep = payload
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or(FrameParseError::MissingHeaderTerminator)?;
    Ok((&payload[..sep], &payload[sep + 4..]))
}

/// Extract the body according to `Content-Length`, or take the remainder.
fn read_body(headers: &Headers, rest: &[u8]) -> Result<Option<Vec<u8>>, FrameParseError> {
    match headers.get("Content-Length") {
        Some(raw) => {
            let expected: usize = raw
                .trim()
                .parse()
                .map_err(|_| FrameParseError::InvalidContentLength(raw.to_owned()))?;
            if expected == 0 {
                return Ok(None);
            }
            if rest.len() < expected {
                return Err(FrameParseError::TruncatedBody {
                    expected,
                    actual: rest.len(),
                });
            }
            Ok(Some(rest[..expected].to_vec()))
        }
        None if rest.is_empty() => Ok(None),
        None => Ok(Some(rest.to_vec())),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_without_body_is_byte_exact() {
        let frame = serialize_command("GET", "/ping", None, "1234567890123");
        assert_eq!(
            frame,
            "GET /ping HTTP/1.1\r\nContent-Length: 0\r\nContent-Type: application/json; charset=UTF-8\r\nTransac-Id: 1234567890123\r\n\r\n"
        );
    }

    #[test]
    fn serialize_with_body_is_byte_exact() {
        let frame = serialize_command("PUT", "/devices/1", Some("{\"value\":true}"), "1");
        assert_eq!(
            frame,
            "PUT /devices/1 HTTP/1.1\r\nContent-Length: 14\r\nContent-Type: application/json; charset=UTF-8\r\nTransac-Id: 1\r\n\r\n{\"value\":true}\r\n\r\n"
        );
    }

    #[test]
    fn parse_response_with_content_length() {
        let payload =
            b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nUri-Origin: /info\r\nTransac-Id: 17\r\n\r\nnull";
        let frame = parse_frame(payload).unwrap();

        match &frame {
            HttpFrame::Response { status, reason, .. } => {
                assert_eq!(*status, 200);
                assert_eq!(reason.as_deref(), Some("OK"));
            }
            other => panic!("expected response, got {other:?}"),
        }
        assert_eq!(frame.uri_origin(), Some("/info"));
        assert_eq!(frame.transac_id(), Some("17"));
        assert_eq!(frame.body(), Some(&b"null"[..]));
    }

    #[test]
    fn parse_request_frame() {
        let payload = b"GET /ping HTTP/1.1\r\nTransac-Id: 9\r\n\r\n";
        let frame = parse_frame(payload).unwrap();

        match &frame {
            HttpFrame::Request { method, path, .. } => {
                assert_eq!(method, "GET");
                assert_eq!(path, "/ping");
            }
            other => panic!("expected request, got {other:?}"),
        }
        assert_eq!(frame.uri_origin(), Some("/ping"));
        assert!(frame.body().is_none());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let payload = b"HTTP/1.1 200 OK\r\nuri-origin: /devices/data\r\nTRANSAC-ID: 3\r\n\r\n";
        let frame = parse_frame(payload).unwrap();
        assert_eq!(frame.uri_origin(), Some("/devices/data"));
        assert_eq!(frame.transac_id(), Some("3"));
    }

    #[test]
    fn missing_content_length_takes_remainder() {
        let payload = b"HTTP/1.1 200 OK\r\nUri-Origin: /x\r\n\r\nleftover bytes";
        let frame = parse_frame(payload).unwrap();
        assert_eq!(frame.body(), Some(&b"leftover bytes"[..]));
    }

    #[test]
    fn content_length_truncates_trailing_crlf() {
        let payload = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n{}\r\n\r\n";
        let frame = parse_frame(payload).unwrap();
        assert_eq!(frame.body(), Some(&b"{}"[..]));
    }

    #[test]
    fn body_shorter_than_content_length_is_an_error() {
        let payload = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n{}";
        let err = parse_frame(payload).unwrap_err();
        assert_eq!(
            err,
            FrameParseError::TruncatedBody {
                expected: 10,
                actual: 2
            }
        );
    }

    #[test]
    fn garbage_start_line_is_an_error() {
        let err = parse_frame(b"hello world\r\n\r\n").unwrap_err();
        assert!(matches!(err, FrameParseError::InvalidStartLine(_)));
    }

    #[test]
    fn roundtrip_preserves_structure() {
        let serialized = serialize_command("PUT", "/devices/1", Some("{\"value\":true}"), "42");
        let frame = parse_frame(serialized.as_bytes()).unwrap();

        match frame {
            HttpFrame::Request {
                method,
                path,
                headers,
                body,
            } => {
                assert_eq!(method, "PUT");
                assert_eq!(path, "/devices/1");
                assert_eq!(headers.get("Content-Length"), Some("14"));
                assert_eq!(headers.get("Transac-Id"), Some("42"));
                assert_eq!(body.as_deref(), Some(&b"{\"value\":true}"[..]));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }
}
