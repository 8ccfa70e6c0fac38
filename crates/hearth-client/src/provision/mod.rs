//! Locating or starting an engine.
//!
//! `acquire` either adopts an endpoint the Config names (after a
//! reachability probe) or resolves a runnable engine binary (override,
//! cache, download) and spawns it, reading the startup greeting. It
//! returns a healthy handle or an error, never a half-started process.

mod artifact;
mod spawn;

pub(crate) use spawn::EngineProcess;

use std::path::PathBuf;

use hearth_protocol::{Endpoint, Version};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::transport;

/// A located or spawned engine, ready for a transport.
#[derive(Debug)]
pub(crate) struct EngineHandle {
    pub(crate) endpoint: Endpoint,
    /// Token the hello frame must present, when the engine requires one.
    pub(crate) token: Option<String>,
    /// Version reported in the greeting. The handshake is authoritative;
    /// this is for logging and early diagnostics.
    pub(crate) version_hint: Option<Version>,
    /// Ownership token for a locally spawned engine. `None` when the
    /// endpoint was adopted.
    pub(crate) process: Option<EngineProcess>,
}

/// Locate or start an engine per `config`.
pub(crate) async fn acquire(config: &Config) -> Result<EngineHandle> {
    if let Some(endpoint) = &config.endpoint {
        transport::probe(endpoint, config.connect_timeout).await?;
        info!(%endpoint, "adopted running engine");
        return Ok(EngineHandle {
            endpoint: endpoint.clone(),
            token: config.session_token.clone(),
            version_hint: None,
            process: None,
        });
    }

    let bin = resolve_engine_bin(config).await?;
    let (process, greeting) = spawn::spawn_engine(&bin, config).await?;
    info!(
        endpoint = %greeting.endpoint,
        version = %greeting.version,
        pid = process.pid(),
        "provisioned local engine"
    );
    Ok(EngineHandle {
        endpoint: greeting.endpoint,
        token: Some(greeting.token),
        version_hint: Some(greeting.version),
        process: Some(process),
    })
}

/// Resolution order: explicit override, then cache, then download.
async fn resolve_engine_bin(config: &Config) -> Result<PathBuf> {
    if let Some(bin) = &config.engine_bin {
        if !tokio::fs::try_exists(bin).await.unwrap_or(false) {
            return Err(Error::Provision(format!(
                "engine binary override does not exist: {}",
                bin.display()
            )));
        }
        debug!(bin = %bin.display(), "using engine binary override");
        return Ok(bin.clone());
    }
    artifact::ensure_engine(config).await
}
