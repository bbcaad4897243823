//! JSON-RPC 2.0 over HTTP/1.1 or LSP-style framing
//!
//! A client encodes envelopes as POST requests and decodes the replies; a
//! server does the opposite. JSON-RPC replies carry only an id, so both ends
//! keep a [`CorrelationRegistry`] to rebuild complete envelopes.
//!
//! With [`JsonRpcTransport::Lsp`] the HTTP head is replaced by a bare
//! `Content-Length` header block and notifications are never acknowledged.

mod correlation;
pub mod http;
pub mod json;

pub use self::correlation::CorrelationRegistry;
pub use self::http::ContentEncoding;

use ::http::header;
use ::http::{Method, StatusCode};
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

use self::http::{HeadBuilder, HttpMessage, StartLine, AGENT};
use self::json::{json_to_value, value_to_json};
use super::{CommProtocol, ProtocolError, ProtocolResult};
use crate::config::JsonRpcConfig;
use crate::message::{
    CommMessage, Fault, GlobalIdGenerator, IdGenerator, GENERIC_ID, ROOT_RESOURCE_PATH,
};
use crate::value::Value;

/// Protocol version string
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code used for application faults
pub const FAULT_ERROR_CODE: i32 = -32000;

const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";

/// Which side of the exchange this codec plays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sends requests, receives responses
    #[default]
    Client,
    /// Receives requests, sends responses
    Server,
}

/// How messages are framed on the stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonRpcTransport {
    /// HTTP/1.1 POST requests and status-line responses
    #[default]
    Http,
    /// `Content-Length: N` + blank line + body, as used by language servers
    Lsp,
}

/// JSON-RPC request object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
    /// Absent (or null) for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonValue>,
}

/// JSON-RPC response object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub id: JsonValue,
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl JsonRpcResponse {
    pub fn success(id: JsonValue, result: JsonValue) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: JsonValue, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// JSON-RPC codec for one end of an HTTP connection
pub struct JsonRpcProtocol {
    role: Role,
    transport: JsonRpcTransport,
    /// Operation name -> wire method name
    aliases: BTreeMap<String, String>,
    host: String,
    path: String,
    keep_alive: bool,
    compression: bool,
    request_compression: Option<ContentEncoding>,
    debug: bool,
    max_message_size: usize,
    /// Coding accepted by the peer, taken from its last `Accept-Encoding`
    encoding: Option<ContentEncoding>,
    /// Peer sent `Connection: close` on its last message
    peer_closing: bool,
    correlation: Arc<CorrelationRegistry>,
    /// Ids of HTTP requests sent and not yet answered, oldest first
    outstanding: VecDeque<i64>,
    ids: Arc<dyn IdGenerator>,
}

impl JsonRpcProtocol {
    pub fn new(role: Role) -> Self {
        Self::from_config(&JsonRpcConfig {
            role,
            ..JsonRpcConfig::default()
        })
    }

    pub fn from_config(config: &JsonRpcConfig) -> Self {
        Self {
            role: config.role,
            transport: config.transport,
            aliases: config.aliases.clone(),
            host: config.host.clone(),
            path: config.path.clone(),
            keep_alive: config.keep_alive,
            compression: config.compression,
            request_compression: config.request_compression,
            debug: config.debug,
            max_message_size: config.max_message_size,
            encoding: None,
            peer_closing: false,
            correlation: Arc::new(CorrelationRegistry::new()),
            outstanding: VecDeque::new(),
            ids: Arc::new(GlobalIdGenerator),
        }
    }

    /// Share a correlation registry with other codecs of the same channel
    pub fn with_correlation(mut self, correlation: Arc<CorrelationRegistry>) -> Self {
        self.correlation = correlation;
        self
    }

    /// Source of the internal ids a server assigns to incoming requests
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn transport(&self) -> JsonRpcTransport {
        self.transport
    }

    pub fn correlation(&self) -> &Arc<CorrelationRegistry> {
        &self.correlation
    }

    /// Whether the connection should be closed after the current exchange
    pub fn should_close(&self) -> bool {
        !self.keep_alive || self.peer_closing
    }

    /// Method name sent on the wire for `operation`
    fn wire_method<'a>(&'a self, operation: &'a str) -> &'a str {
        self.aliases
            .get(operation)
            .map(String::as_str)
            .unwrap_or(operation)
    }

    /// Operation whose alias is `method`, or `method` itself
    fn local_operation(&self, method: String) -> String {
        self.aliases
            .iter()
            .find(|(_, alias)| **alias == method)
            .map(|(operation, _)| operation.clone())
            .unwrap_or(method)
    }

    fn encode_request(&mut self, message: &CommMessage, dst: &mut BytesMut) -> ProtocolResult<()> {
        let id = (!message.has_generic_id()).then(|| JsonValue::from(message.id()));
        let params = (!message.value().is_empty()).then(|| value_to_json(message.value()));
        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: self.wire_method(message.operation_name()).to_string(),
            params,
            id,
        };
        let json = to_json_body(&request)?;

        match self.transport {
            JsonRpcTransport::Http => self.write_request(&json, dst)?,
            JsonRpcTransport::Lsp => self.write_lsp(&json, dst)?,
        }

        // Only what actually went out waits for a reply.
        if !message.has_generic_id() {
            self.correlation
                .record_operation(message.id(), message.operation_name());
            if self.transport == JsonRpcTransport::Http {
                self.outstanding.push_back(message.id());
            }
        }
        Ok(())
    }

    fn write_request(&self, json: &[u8], dst: &mut BytesMut) -> ProtocolResult<()> {
        let mut head = HeadBuilder::request(&Method::POST, &self.path)
            .header(&header::HOST, &self.host)
            .header(&header::USER_AGENT, AGENT);
        let coding = if self.compression {
            let accept = self
                .request_compression
                .map(ContentEncoding::as_str)
                .unwrap_or("gzip, deflate");
            head = head.header(&header::ACCEPT_ENCODING, accept);
            self.request_compression
        } else {
            None
        };

        self.write_message(head, coding, json, dst)
    }

    fn encode_response(&mut self, message: &CommMessage, dst: &mut BytesMut) -> ProtocolResult<()> {
        if message.has_generic_id() && self.transport == JsonRpcTransport::Lsp {
            if self.debug {
                debug!("jsonrpc reply: none for notification {}", message.operation_name());
            }
            return Ok(());
        }
        if message.has_generic_id() && !message.is_fault() {
            let mut head =
                HeadBuilder::response(StatusCode::NO_CONTENT).header(&header::SERVER, AGENT);
            if self.should_close() {
                head = head.header(&header::CONNECTION, "close");
            }
            if self.debug {
                debug!("jsonrpc reply: 204 for notification {}", message.operation_name());
            }
            dst.extend_from_slice(head.finish().as_bytes());
            return Ok(());
        }

        let id = self
            .correlation
            .take_external_id(message.id())
            .unwrap_or_else(|| JsonValue::from(message.id()));
        let response = match message.fault() {
            Some(fault) => JsonRpcResponse::failure(
                id,
                JsonRpcError {
                    code: FAULT_ERROR_CODE,
                    message: fault.name.clone(),
                    data: Some(value_to_json(&fault.value)),
                },
            ),
            None => JsonRpcResponse::success(id, value_to_json(message.value())),
        };
        let json = to_json_body(&response)?;

        if self.transport == JsonRpcTransport::Lsp {
            return self.write_lsp(&json, dst);
        }
        let head = HeadBuilder::response(StatusCode::OK).header(&header::SERVER, AGENT);
        let coding = if self.compression { self.encoding } else { None };
        self.write_message(head, coding, &json, dst)
    }

    /// Append `json` behind a bare `Content-Length` header block
    fn write_lsp(&self, json: &[u8], dst: &mut BytesMut) -> ProtocolResult<()> {
        if self.debug {
            debug!("jsonrpc send: {}", String::from_utf8_lossy(json));
        }
        if json.len() > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge(json.len(), self.max_message_size));
        }
        let head = http::lsp_head(json.len());
        dst.reserve(head.len() + json.len());
        dst.extend_from_slice(head.as_bytes());
        dst.extend_from_slice(json);
        Ok(())
    }

    /// Finish the head, apply content coding and append everything to `dst`
    fn write_message(
        &self,
        mut head: HeadBuilder,
        coding: Option<ContentEncoding>,
        json: &[u8],
        dst: &mut BytesMut,
    ) -> ProtocolResult<()> {
        if self.debug {
            debug!("jsonrpc send: {}", String::from_utf8_lossy(json));
        }

        let body = match coding {
            Some(coding) => {
                head = head.header(&header::CONTENT_ENCODING, coding.as_str());
                coding.encode(json)?
            }
            None => json.to_vec(),
        };
        if body.len() > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge(body.len(), self.max_message_size));
        }
        if self.should_close() {
            head = head.header(&header::CONNECTION, "close");
        }
        let head = head
            .header(&header::CONTENT_TYPE, CONTENT_TYPE_JSON)
            .header(&header::CONTENT_LENGTH, body.len())
            .finish();

        dst.reserve(head.len() + body.len());
        dst.extend_from_slice(head.as_bytes());
        dst.extend_from_slice(&body);
        Ok(())
    }

    fn decode_frame(&mut self, src: &mut BytesMut, eof: bool) -> ProtocolResult<Option<CommMessage>> {
        if self.transport == JsonRpcTransport::Lsp {
            return self.decode_lsp(src);
        }

        let parsed = match self.role {
            Role::Server => http::parse_request(&src[..], self.max_message_size)?,
            Role::Client => http::parse_response(&src[..], eof, self.max_message_size)?,
        };
        let Some((message, used)) = parsed else {
            return Ok(None);
        };
        src.advance(used);

        self.peer_closing = message.wants_close();
        if self.compression {
            // A request without the header takes back any earlier choice.
            self.encoding = message
                .header(&header::ACCEPT_ENCODING)
                .and_then(http::negotiate);
        }

        let envelope = match &message.start {
            StartLine::Request { method, .. } => self.read_request(method, &message)?,
            StartLine::Response { status } => self.read_response(*status, &message)?,
        };
        Ok(Some(envelope))
    }

    fn decode_lsp(&mut self, src: &mut BytesMut) -> ProtocolResult<Option<CommMessage>> {
        let Some((body, used)) = http::parse_lsp(&src[..], self.max_message_size)? else {
            return Ok(None);
        };
        src.advance(used);
        if self.debug {
            debug!("jsonrpc recv: {}", String::from_utf8_lossy(&body));
        }

        let envelope = match self.role {
            Role::Server => self.request_from_body(&body)?,
            Role::Client => self.response_from_body(&body)?,
        };
        Ok(Some(envelope))
    }

    fn read_request(&self, method: &Method, message: &HttpMessage) -> ProtocolResult<CommMessage> {
        if *method != Method::POST {
            return Err(ProtocolError::UnsupportedMethod(method.to_string()));
        }
        let body = message.decoded_body()?;
        if self.debug {
            debug!("jsonrpc recv: {}", String::from_utf8_lossy(&body));
        }
        self.request_from_body(&body)
    }

    fn request_from_body(&self, body: &[u8]) -> ProtocolResult<CommMessage> {
        if body.is_empty() {
            return Err(ProtocolError::malformed("body", "empty request body"));
        }

        let request: JsonRpcRequest = from_json_body(body)?;
        let value = request
            .params
            .as_ref()
            .map(json_to_value)
            .unwrap_or_default();
        let id = match request.id {
            None => GENERIC_ID,
            Some(external) => {
                let id = self.ids.next_id();
                self.correlation.record_external_id(id, external);
                id
            }
        };
        Ok(CommMessage::new(
            id,
            self.local_operation(request.method),
            ROOT_RESOURCE_PATH,
            value,
            None,
        ))
    }

    fn read_response(&mut self, status: StatusCode, message: &HttpMessage) -> ProtocolResult<CommMessage> {
        let body = message.decoded_body()?;
        if self.debug {
            debug!("jsonrpc recv: {} {}", status, String::from_utf8_lossy(&body));
        }
        if status.is_client_error() || status.is_server_error() {
            // The error answers the oldest request still waiting.
            if let Some(id) = self.outstanding.pop_front() {
                self.correlation.take_operation(id);
            }
            return Err(ProtocolError::HttpStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        self.response_from_body(&body)
    }

    fn response_from_body(&mut self, body: &[u8]) -> ProtocolResult<CommMessage> {
        if body.iter().all(u8::is_ascii_whitespace) {
            // Reply to a notification
            return Ok(CommMessage::undefined());
        }

        let response: JsonRpcResponse = from_json_body(body)?;
        let id = parse_id(&response.id)?;
        self.outstanding.retain(|&pending| pending != id);
        let operation = self
            .correlation
            .take_operation(id)
            .ok_or_else(|| ProtocolError::malformed("id", format!("no pending request {id}")))?;

        if let Some(error) = response.error {
            let data = error.data.as_ref().map(json_to_value).unwrap_or_default();
            return Ok(CommMessage::new(
                id,
                operation,
                ROOT_RESOURCE_PATH,
                Value::default(),
                Some(Fault::new(error.message, data)),
            ));
        }
        let value = response
            .result
            .as_ref()
            .map(json_to_value)
            .unwrap_or_default();
        Ok(CommMessage::new(id, operation, ROOT_RESOURCE_PATH, value, None))
    }
}

fn to_json_body<T: Serialize>(body: &T) -> ProtocolResult<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| ProtocolError::malformed("body", e.to_string()))
}

fn from_json_body<'a, T: Deserialize<'a>>(body: &'a [u8]) -> ProtocolResult<T> {
    serde_json::from_slice(body).map_err(|e| ProtocolError::malformed("body", e.to_string()))
}

/// Response ids are the numeric ids this client sent, possibly quoted
fn parse_id(id: &JsonValue) -> ProtocolResult<i64> {
    let parsed = match id {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ProtocolError::malformed("id", format!("not a request id: {id}")))
}

impl CommProtocol for JsonRpcProtocol {
    fn name(&self) -> &'static str {
        "jsonrpc"
    }

    fn encode(&mut self, message: &CommMessage, dst: &mut BytesMut) -> ProtocolResult<()> {
        match self.role {
            Role::Client => self.encode_request(message, dst),
            Role::Server => self.encode_response(message, dst),
        }
    }

    fn decode(&mut self, src: &mut BytesMut) -> ProtocolResult<Option<CommMessage>> {
        self.decode_frame(src, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> ProtocolResult<CommMessage> {
        match self.decode_frame(src, true)? {
            Some(message) => Ok(message),
            None => Err(ProtocolError::malformed(
                "message",
                format!("stream closed with {} unread bytes", src.len()),
            )),
        }
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}
