//! Client runtime for the Hearth engine
//!
//! This crate owns the session lifecycle end to end:
//!
//! 1. **Provision**: adopt a running engine endpoint, or install and spawn
//!    a `hearth-engine` binary (cache, download, checksum, startup greeting)
//! 2. **Connect**: open the newline-delimited JSON channel and perform the
//!    version handshake
//! 3. **Execute**: validated, sequence-correlated queries with per-call
//!    timeouts over one multiplexed connection
//!
//! The entry point is [`Session::connect`] with a [`Config`]; synchronous
//! callers use [`blocking::Session`]. Wire types live in `hearth-protocol`
//! and the ones callers meet are re-exported here.

pub mod blocking;
mod config;
mod error;
mod executor;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock_engine;
mod provision;
mod session;
mod transport;

pub use config::{
    Config, ConfigBuilder, ConfigError, LogSink, DEFAULT_ENGINE_VERSION, ENV_DISTRIBUTION_BASE,
    ENV_ENGINE_BIN, ENV_SESSION_ENDPOINT, ENV_SESSION_TOKEN, MIN_SUPPORTED_ENGINE,
};
pub use error::{Error, ExecFailure, QueryFailure, Result};
pub use executor::{Operation, Query};
pub use session::{with_session, Session};

// Protocol types that surface through configs, results, and errors.
pub use hearth_protocol::{
    DocumentError, Endpoint, ErrorCode, ErrorPayload, ParseEndpointError, ParseVersionError,
    Version, VersionRange,
};
