//! Synchronous facade over the async session.
//!
//! [`Session`] here owns a private tokio runtime and forwards each call
//! through `block_on`, for callers that are not themselves async. It must
//! not be used from inside an async context; tokio refuses nested
//! `block_on`.

use std::time::Duration;

use hearth_protocol::Version;
use serde_json::Value;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::{Operation, Query};
use crate::session;

/// Blocking handle to an engine session.
///
/// Closes itself on drop if the caller never did.
pub struct Session {
    // Declared before the runtime so teardown still has a live reactor.
    inner: session::Session,
    runtime: tokio::runtime::Runtime,
}

impl Session {
    /// Provision, connect, and handshake, blocking until ready.
    pub fn connect(config: Config) -> Result<Self> {
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| Error::Session(format!("failed to start async runtime: {e}")))?;
        let inner = runtime.block_on(session::Session::connect(config))?;
        Ok(Self { inner, runtime })
    }

    /// Version the engine reported during the handshake.
    pub fn engine_version(&self) -> Version {
        self.inner.engine_version()
    }

    /// Execute one query with the configured default timeout.
    pub fn execute(&self, query: Query) -> Result<Value> {
        self.runtime.block_on(self.inner.execute(query))
    }

    /// Execute one query with an explicit timeout for this call only.
    pub fn execute_with_timeout(&self, query: Query, timeout: Duration) -> Result<Value> {
        self.runtime
            .block_on(self.inner.execute_with_timeout(query, timeout))
    }

    /// Execute a typed operation and decode its result shape.
    pub fn run<O: Operation>(&self, operation: &O) -> Result<O::Output> {
        self.runtime.block_on(self.inner.run(operation))
    }

    /// Release the session. Idempotent; never fails.
    pub fn close(&self) {
        self.runtime.block_on(self.inner.close());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.runtime.block_on(self.inner.close());
    }
}
