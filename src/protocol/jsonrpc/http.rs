//! HTTP/1.1 framing and content coding for JSON-RPC bodies
//!
//! Heads are parsed with `httparse`; bodies are framed by `Content-Length`
//! or chunked transfer coding. Parsing works on a buffer and reports
//! `Ok(None)` until the whole message is available.
//!
//! The same header parsing also reads the start-line-less framing of the
//! Language Server Protocol (`Content-Length: N` + blank line + body).

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::protocol::codec::{ProtocolError, ProtocolResult};

pub const CRLF: &str = "\r\n";

/// Value of the Server / User-Agent headers
pub const AGENT: &str = "commwire";

const MAX_HEADERS: usize = 64;

/// Supported body codings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    Gzip,
    /// zlib-wrapped deflate
    Deflate,
}

impl ContentEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(ContentEncoding::Gzip),
            "deflate" => Some(ContentEncoding::Deflate),
            _ => None,
        }
    }

    /// Compress `body`
    pub fn encode(self, body: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            ContentEncoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(body)?;
                encoder.finish()
            }
            ContentEncoding::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(body)?;
                encoder.finish()
            }
        }
    }

    /// Decompress `body`
    pub fn decode(self, body: &[u8]) -> ProtocolResult<Vec<u8>> {
        let mut out = Vec::new();
        let result = match self {
            ContentEncoding::Gzip => GzDecoder::new(body).read_to_end(&mut out),
            ContentEncoding::Deflate => ZlibDecoder::new(body).read_to_end(&mut out),
        };
        result.map_err(|e| {
            ProtocolError::malformed("body", format!("invalid {} data: {e}", self.as_str()))
        })?;
        Ok(out)
    }
}

/// Pick the coding to answer with from an `Accept-Encoding` header.
///
/// gzip is preferred over deflate; codings with `q=0` are skipped.
pub fn negotiate(accept_encoding: &str) -> Option<ContentEncoding> {
    let accepted: Vec<ContentEncoding> = accept_encoding
        .split(',')
        .filter_map(|item| {
            let mut parts = item.split(';');
            let coding = ContentEncoding::from_token(parts.next().unwrap_or(""))?;
            let refused = parts.any(|p| {
                p.trim()
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            });
            (!refused).then_some(coding)
        })
        .collect();

    [ContentEncoding::Gzip, ContentEncoding::Deflate]
        .into_iter()
        .find(|c| accepted.contains(c))
}

/// Start line of a parsed message
#[derive(Debug, Clone, PartialEq)]
pub enum StartLine {
    Request { method: Method, target: String },
    Response { status: StatusCode },
}

/// A complete HTTP message with its (still content-coded) body
#[derive(Debug, Clone)]
pub struct HttpMessage {
    pub start: StartLine,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpMessage {
    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body with any `Content-Encoding` removed
    pub fn decoded_body(&self) -> ProtocolResult<Vec<u8>> {
        match self.header(&header::CONTENT_ENCODING).map(str::trim) {
            None | Some("") => Ok(self.body.clone()),
            Some(coding) if coding.eq_ignore_ascii_case("identity") => Ok(self.body.clone()),
            Some(coding) => match ContentEncoding::from_token(coding) {
                Some(encoding) => encoding.decode(&self.body),
                None => Err(ProtocolError::malformed(
                    "Content-Encoding",
                    format!("unsupported coding {coding}"),
                )),
            },
        }
    }

    /// Whether the peer asked to close the connection after this message
    pub fn wants_close(&self) -> bool {
        self.header(&header::CONNECTION)
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
    }
}

/// Writes a message head line by line
pub struct HeadBuilder {
    text: String,
}

impl HeadBuilder {
    pub fn request(method: &Method, target: &str) -> Self {
        Self {
            text: format!("{} {} HTTP/1.1{}", method, target, CRLF),
        }
    }

    pub fn response(status: StatusCode) -> Self {
        Self {
            text: format!(
                "HTTP/1.1 {} {}{}",
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                CRLF
            ),
        }
    }

    pub fn header(mut self, name: &HeaderName, value: impl std::fmt::Display) -> Self {
        self.text.push_str(&format!("{}: {}{}", canonical_name(name), value, CRLF));
        self
    }

    pub fn finish(mut self) -> String {
        self.text.push_str(CRLF);
        self.text
    }
}

/// `content-type` -> `Content-Type`
fn canonical_name(name: &HeaderName) -> String {
    name.as_str()
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Parse a request from the front of `buf`.
///
/// Returns the message and the number of bytes it occupied.
pub fn parse_request(buf: &[u8], max_size: usize) -> ProtocolResult<Option<(HttpMessage, usize)>> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut slots);
    let head_len = match request.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return check_partial(buf, max_size),
        Err(e) => return Err(ProtocolError::malformed("request head", e.to_string())),
    };

    let method = Method::from_bytes(request.method.unwrap_or("").as_bytes())
        .map_err(|e| ProtocolError::malformed("request method", e.to_string()))?;
    let target = request.path.unwrap_or("/").to_string();
    let headers = collect_headers(request.headers)?;

    // A request without framing headers has no body.
    let framed = frame_body(&buf[head_len..], &headers, max_size, Some(0))?;
    Ok(framed.map(|(body, body_len)| {
        (
            HttpMessage {
                start: StartLine::Request { method, target },
                headers,
                body,
            },
            head_len + body_len,
        )
    }))
}

/// Parse a response from the front of `buf`.
///
/// With `eof` set, a response without framing headers takes the rest of the
/// buffer as its body.
pub fn parse_response(
    buf: &[u8],
    eof: bool,
    max_size: usize,
) -> ProtocolResult<Option<(HttpMessage, usize)>> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut slots);
    let head_len = match response.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return check_partial(buf, max_size),
        Err(e) => return Err(ProtocolError::malformed("status line", e.to_string())),
    };

    let code = response.code.unwrap_or(0);
    let status = StatusCode::from_u16(code)
        .map_err(|e| ProtocolError::malformed("status code", e.to_string()))?;
    let headers = collect_headers(response.headers)?;

    let bodyless = status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED;
    let unframed_len = if bodyless {
        Some(0)
    } else if eof {
        Some(buf.len() - head_len)
    } else {
        None
    };

    let framed = frame_body(&buf[head_len..], &headers, max_size, unframed_len)?;
    Ok(framed.map(|(body, body_len)| {
        (
            HttpMessage {
                start: StartLine::Response { status },
                headers,
                body,
            },
            head_len + body_len,
        )
    }))
}

/// Header block that precedes an LSP-framed body
pub fn lsp_head(body_len: usize) -> String {
    format!("Content-Length: {}{}{}", body_len, CRLF, CRLF)
}

/// Parse an LSP-framed message from the front of `buf`.
///
/// Returns the body and the number of bytes the whole message occupied.
pub fn parse_lsp(buf: &[u8], max_size: usize) -> ProtocolResult<Option<(Vec<u8>, usize)>> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let (head_len, raw) = match httparse::parse_headers(buf, &mut slots) {
        Ok(httparse::Status::Complete(parsed)) => parsed,
        Ok(httparse::Status::Partial) => return check_partial(buf, max_size),
        Err(e) => return Err(ProtocolError::malformed("header block", e.to_string())),
    };
    let headers = collect_headers(raw)?;
    if !headers.contains_key(header::CONTENT_LENGTH) {
        return Err(ProtocolError::malformed("Content-Length", "missing"));
    }

    let framed = frame_body(&buf[head_len..], &headers, max_size, None)?;
    Ok(framed.map(|(body, body_len)| (body, head_len + body_len)))
}

fn check_partial<T>(buf: &[u8], max_size: usize) -> ProtocolResult<Option<T>> {
    if buf.len() > max_size {
        return Err(ProtocolError::MessageTooLarge(buf.len(), max_size));
    }
    Ok(None)
}

fn collect_headers(raw: &[httparse::Header<'_>]) -> ProtocolResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    for h in raw {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| ProtocolError::malformed("header name", e.to_string()))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|e| ProtocolError::malformed(h.name.to_string(), e.to_string()))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Cut the body out of `rest` according to the framing headers.
///
/// `unframed_len` is the body length to assume when neither
/// `Transfer-Encoding: chunked` nor `Content-Length` is present; `None`
/// means the body runs until the peer closes.
fn frame_body(
    rest: &[u8],
    headers: &HeaderMap,
    max_size: usize,
    unframed_len: Option<usize>,
) -> ProtocolResult<Option<(Vec<u8>, usize)>> {
    let chunked = headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return decode_chunked(rest, max_size);
    }

    let length = match headers.get(header::CONTENT_LENGTH) {
        Some(raw) => Some(
            raw.to_str()
                .ok()
                .and_then(|s| s.trim().parse::<usize>().ok())
                .ok_or_else(|| ProtocolError::malformed("Content-Length", "not a number"))?,
        ),
        None => unframed_len,
    };

    match length {
        Some(len) if len > max_size => Err(ProtocolError::MessageTooLarge(len, max_size)),
        Some(len) if rest.len() >= len => Ok(Some((rest[..len].to_vec(), len))),
        _ => check_partial(rest, max_size),
    }
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| from + p)
}

/// Decode a chunked body; returns the body and the bytes consumed
fn decode_chunked(rest: &[u8], max_size: usize) -> ProtocolResult<Option<(Vec<u8>, usize)>> {
    let mut body = Vec::new();
    let mut pos = 0;
    loop {
        let Some(line_end) = find_crlf(rest, pos) else {
            return check_partial(rest, max_size);
        };
        let line = std::str::from_utf8(&rest[pos..line_end])
            .map_err(|_| ProtocolError::malformed("chunk size", "not ASCII"))?;
        let size_text = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_text, 16)
            .map_err(|_| ProtocolError::malformed("chunk size", format!("bad size {size_text:?}")))?;
        pos = line_end + 2;

        if size == 0 {
            // Skip trailers up to the blank line.
            loop {
                let Some(end) = find_crlf(rest, pos) else {
                    return check_partial(rest, max_size);
                };
                let blank = end == pos;
                pos = end + 2;
                if blank {
                    return Ok(Some((body, pos)));
                }
            }
        }

        let total = body.len().saturating_add(size);
        if total > max_size {
            return Err(ProtocolError::MessageTooLarge(total, max_size));
        }
        if rest.len() < pos + size + 2 {
            return Ok(None);
        }
        body.extend_from_slice(&rest[pos..pos + size]);
        if &rest[pos + size..pos + size + 2] != b"\r\n" {
            return Err(ProtocolError::malformed("chunk", "missing CRLF after data"));
        }
        pos += size + 2;
    }
}
