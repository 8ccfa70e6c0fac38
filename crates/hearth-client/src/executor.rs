//! Query construction and execution against a live session.
//!
//! A [`Query`] is validated locally with `ensure_well_formed` before any
//! frame is written, so a malformed document never reaches the engine.
//! Each call draws a fresh sequence number, registers a waiter with the
//! session's reader task, and awaits its reply under a timeout. A timed-out
//! call withdraws its waiter, which makes the late reply (if it ever
//! arrives) fall on the floor in the reader.

use std::time::Duration;

use hearth_protocol::{
    ensure_well_formed, ClientMessage, ErrorCode, ErrorPayload, QueryBody, Reply, ReplyBody,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, ExecFailure, QueryFailure, Result};
use crate::session::Shared;

/// One query to execute: a document plus optional operation name and
/// variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub(crate) document: String,
    pub(crate) operation: Option<String>,
    pub(crate) variables: Map<String, Value>,
}

impl Query {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            operation: None,
            variables: Map::new(),
        }
    }

    /// Select one operation when the document defines several.
    pub fn operation(mut self, name: impl Into<String>) -> Self {
        self.operation = Some(name.into());
        self
    }

    /// Bind a variable referenced by the document.
    pub fn var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

/// A typed request: a document plus the shape its reply data decodes into.
///
/// Implementors get `Session::run`, which executes the document and decodes
/// the reply through serde instead of handing back raw JSON.
pub trait Operation {
    type Output: DeserializeOwned;

    fn document(&self) -> String;

    fn operation_name(&self) -> Option<&str> {
        None
    }

    fn variables(&self) -> Map<String, Value> {
        Map::new()
    }
}

pub(crate) async fn execute(
    shared: &Shared,
    query: Query,
    timeout: Option<Duration>,
) -> Result<Value> {
    let reply = exchange(shared, &query, timeout).await?;
    match reply.into_body() {
        ReplyBody::Data(value) => Ok(value),
        ReplyBody::Errors(errors) => Err(classify(errors)),
    }
}

pub(crate) async fn run<O: Operation>(shared: &Shared, operation: &O) -> Result<O::Output> {
    let query = Query {
        document: operation.document(),
        operation: operation.operation_name().map(str::to_string),
        variables: operation.variables(),
    };
    let value = execute(shared, query, None).await?;
    serde_json::from_value(value).map_err(Error::Decode)
}

async fn exchange(shared: &Shared, query: &Query, timeout: Option<Duration>) -> Result<Reply> {
    if let Some(reason) = shared.broken_reason() {
        return Err(Error::Session(reason));
    }
    ensure_well_formed(&query.document)?;

    let seq = shared.next_seq();
    let limit = timeout.unwrap_or(shared.default_timeout);
    let waiter = shared.register_waiter(seq);
    let frame = ClientMessage::Query(QueryBody {
        seq,
        document: query.document.clone(),
        operation: query.operation.clone(),
        variables: query.variables.clone(),
    });

    {
        let mut writer = shared.writer.lock().await;
        if let Err(e) = writer.send(&frame).await {
            shared.discard_waiter(seq);
            shared.mark_broken(&e.to_string());
            return Err(e);
        }
    }
    debug!(seq, operation = query.operation.as_deref(), "query sent");

    match tokio::time::timeout(limit, waiter).await {
        Ok(Ok(reply)) => Ok(reply),
        // Waiter dropped: the reader task recorded why before draining.
        Ok(Err(_)) => {
            let reason = shared
                .broken_reason()
                .unwrap_or_else(|| "connection lost".to_string());
            Err(Error::Transport(reason))
        }
        Err(_) => {
            shared.discard_waiter(seq);
            debug!(seq, ?limit, "query timed out; any late reply will be discarded");
            Err(Error::ExecuteTimeout { limit })
        }
    }
}

/// Map engine error payloads onto the caller-facing failure kinds. Any
/// `exec_failed` payload takes precedence and carries its command detail.
fn classify(errors: Vec<ErrorPayload>) -> Error {
    if let Some(failed) = errors.iter().find(|e| e.code == ErrorCode::ExecFailed) {
        return Error::Exec(ExecFailure {
            operation: failed.operation_name().unwrap_or("unknown").to_string(),
            message: failed.message.clone(),
            exit_code: failed.exit_code,
            stderr: failed.stderr.clone(),
        });
    }
    Error::Query(QueryFailure { errors })
}
