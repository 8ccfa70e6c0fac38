//! Session frames exchanged between client and engine.
//!
//! Frames travel as newline-delimited JSON, one object per line, tagged by
//! `type`. The client speaks [`ClientMessage`], the engine answers with
//! [`EngineMessage`]. Replies are correlated to queries by `seq`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::version::Version;

/// Revision of this frame protocol. Sent in `hello`, echoed in `welcome`.
pub const PROTOCOL_REVISION: u32 = 1;

/// Identity the client reports during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake opener. Must be the first frame on a new connection.
    Hello {
        revision: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        client: ClientInfo,
    },
    /// One query to execute.
    Query(QueryBody),
    /// Courtesy close notice; the engine ends the session on receipt.
    Goodbye,
}

impl ClientMessage {
    /// Serialize to a single newline-terminated JSON line.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Body of a query frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryBody {
    pub seq: u64,
    pub document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
}

/// Frames sent by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineMessage {
    /// Handshake answer; carries the engine's version.
    Welcome { revision: u32, version: Version },
    /// Correlated answer to a query frame.
    Reply(Reply),
    /// Connection-level failure report. During the handshake it means the
    /// hello was rejected; afterwards it marks the session broken.
    Fault { message: String },
}

impl EngineMessage {
    /// Serialize to a single newline-terminated JSON line.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Reply to one query. Carries `data` or `errors`, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorPayload>,
}

impl Reply {
    pub fn data(seq: u64, data: Value) -> Self {
        Self {
            seq,
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn errors(seq: u64, errors: Vec<ErrorPayload>) -> Self {
        Self {
            seq,
            data: None,
            errors,
        }
    }

    /// Collapse the wire shape into the success/failure alternative.
    /// A reply with any error payload is a failure even if `data` was also
    /// present on the wire.
    pub fn into_body(self) -> ReplyBody {
        if self.errors.is_empty() {
            ReplyBody::Data(self.data.unwrap_or(Value::Null))
        } else {
            ReplyBody::Errors(self.errors)
        }
    }
}

/// Decoded alternative of a [`Reply`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Data(Value),
    Errors(Vec<ErrorPayload>),
}

/// Category tag on an engine error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request was well-formed but the engine rejected it.
    Query,
    /// A requested operation started executing and failed.
    ExecFailed,
    /// The engine hit an internal fault while serving the request.
    Internal,
    /// Forward compatibility: codes this client does not know.
    #[serde(other)]
    Unknown,
}

/// Structured error reported by the engine inside a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    /// Path of the failing sub-operation within the document, outermost
    /// first. Empty when the error is not attributable to one operation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Exit status of the external command, for `exec_failed` payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Captured stderr of the external command, for `exec_failed` payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl ErrorPayload {
    /// A plain query-category payload with just a message.
    pub fn query(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Query,
            message: message.into(),
            path: Vec::new(),
            operation: None,
            exit_code: None,
            stderr: None,
        }
    }

    /// Name of the operation this payload blames: the explicit field when
    /// present, otherwise the innermost path element.
    pub fn operation_name(&self) -> Option<&str> {
        self.operation
            .as_deref()
            .or_else(|| self.path.last().map(String::as_str))
    }
}
