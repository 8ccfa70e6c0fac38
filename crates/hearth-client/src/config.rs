//! Resolved connection parameters.
//!
//! `Config` is the immutable input to `Session::connect`. It is built
//! programmatically through [`ConfigBuilder`]; flag and file parsing live
//! upstream. [`Config::from_env`] additionally overlays the conventional
//! environment variables so a process launched under an already-running
//! engine session can adopt it.

use std::path::PathBuf;
use std::time::Duration;

use hearth_protocol::{Endpoint, ParseEndpointError, ParseVersionError, Version, VersionRange};
use thiserror::Error;

/// Engine version provisioned when the cache and overrides name nothing.
pub const DEFAULT_ENGINE_VERSION: Version = Version::new(0, 9, 2);

/// Oldest engine this client can drive.
pub const MIN_SUPPORTED_ENGINE: Version = Version::new(0, 9, 0);

/// Adopt a running session: coordinates of its endpoint.
pub const ENV_SESSION_ENDPOINT: &str = "HEARTH_SESSION_ENDPOINT";
/// Adopt a running session: its access token.
pub const ENV_SESSION_TOKEN: &str = "HEARTH_SESSION_TOKEN";
/// Explicit engine binary path, bypassing cache and download.
pub const ENV_ENGINE_BIN: &str = "HEARTH_ENGINE_BIN";
/// Override of the artifact distribution base URL.
pub const ENV_DISTRIBUTION_BASE: &str = "HEARTH_DISTRIBUTION_BASE";

/// Errors rejected at configuration build time, before provisioning runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] ParseEndpointError),
    #[error("invalid engine version: {0}")]
    Version(#[from] ParseVersionError),
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("engine version range is empty ({0})")]
    EmptyVersionRange(VersionRange),
    #[error("a session token requires an explicit endpoint")]
    TokenWithoutEndpoint,
    #[error("distribution base `{0}` is not an http(s) URL")]
    DistributionBase(String),
    #[error("environment variable {var} is invalid: {message}")]
    Env { var: &'static str, message: String },
}

/// Where the engine subprocess's log output goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogSink {
    /// Each line becomes a `debug!` event on the `hearth::engine` target.
    #[default]
    Tracing,
    /// The engine inherits this process's stderr.
    Stderr,
    /// Lines are appended to the given file.
    File(PathBuf),
    /// Output is dropped.
    Discard,
}

/// Immutable, validated connection parameters.
///
/// Created once per connection attempt and consumed by the Session that
/// uses it.
#[derive(Debug, Clone)]
pub struct Config {
    /// Endpoint of an already-running engine. `None` means auto-provision.
    pub endpoint: Option<Endpoint>,
    /// Access token for an adopted endpoint.
    pub session_token: Option<String>,
    /// Working directory handed to a spawned engine.
    pub workdir: Option<PathBuf>,
    /// Engine version to provision when nothing is cached.
    pub engine_version: Version,
    /// Versions this client accepts during the handshake.
    pub compat: VersionRange,
    /// Bound on provisioning, channel open, and handshake waits.
    pub connect_timeout: Duration,
    /// Default bound on each query awaiting its reply.
    pub request_timeout: Duration,
    /// Explicit engine binary, bypassing cache and download.
    pub engine_bin: Option<PathBuf>,
    /// Artifact cache root override.
    pub cache_dir: Option<PathBuf>,
    /// Distribution base URL override.
    pub distribution_base: Option<String>,
    /// Destination for engine subprocess logs.
    pub log_sink: LogSink,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            session_token: None,
            workdir: None,
            engine_version: DEFAULT_ENGINE_VERSION,
            compat: VersionRange::at_least(MIN_SUPPORTED_ENGINE),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            engine_bin: None,
            cache_dir: None,
            distribution_base: None,
            log_sink: LogSink::default(),
        }
    }
}

impl Config {
    /// Create a new builder for connection parameters
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Defaults plus environment overlays (the `HEARTH_*` variables).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::builder().env()?.build()
    }
}

/// Builder for [`Config`]
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    endpoint: Option<Endpoint>,
    session_token: Option<String>,
    workdir: Option<PathBuf>,
    engine_version: Option<Version>,
    compat: Option<VersionRange>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    engine_bin: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    distribution_base: Option<String>,
    log_sink: Option<LogSink>,
}

impl ConfigBuilder {
    /// Connect to an already-running engine instead of provisioning one
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Token presented during the handshake against an explicit endpoint
    pub fn session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Working directory for a spawned engine
    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Engine version to provision when the cache is empty
    pub fn engine_version(mut self, version: Version) -> Self {
        self.engine_version = Some(version);
        self
    }

    /// Accepted engine version window for the handshake
    pub fn compat(mut self, range: VersionRange) -> Self {
        self.compat = Some(range);
        self
    }

    /// Bound on provisioning, channel open, and handshake waits
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Default bound on each query awaiting its reply
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Explicit engine binary path, bypassing cache and download
    pub fn engine_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.engine_bin = Some(path.into());
        self
    }

    /// Artifact cache root override
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Distribution base URL override
    pub fn distribution_base(mut self, base: impl Into<String>) -> Self {
        self.distribution_base = Some(base.into());
        self
    }

    /// Destination for engine subprocess logs
    pub fn log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Overlay recognized environment variables onto fields not already
    /// set. Explicit builder values keep precedence over the environment.
    pub fn env(mut self) -> Result<Self, ConfigError> {
        if self.endpoint.is_none() {
            if let Some(raw) = read_env(ENV_SESSION_ENDPOINT) {
                let endpoint = raw.parse().map_err(|e: ParseEndpointError| ConfigError::Env {
                    var: ENV_SESSION_ENDPOINT,
                    message: e.to_string(),
                })?;
                self.endpoint = Some(endpoint);
            }
        }
        if self.session_token.is_none() {
            self.session_token = read_env(ENV_SESSION_TOKEN);
        }
        if self.engine_bin.is_none() {
            self.engine_bin = std::env::var_os(ENV_ENGINE_BIN).map(PathBuf::from);
        }
        if self.distribution_base.is_none() {
            self.distribution_base = read_env(ENV_DISTRIBUTION_BASE);
        }
        Ok(self)
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<Config, ConfigError> {
        let defaults = Config::default();
        let config = Config {
            endpoint: self.endpoint,
            session_token: self.session_token,
            workdir: self.workdir,
            engine_version: self.engine_version.unwrap_or(defaults.engine_version),
            compat: self.compat.unwrap_or(defaults.compat),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            engine_bin: self.engine_bin,
            cache_dir: self.cache_dir,
            distribution_base: self.distribution_base,
            log_sink: self.log_sink.unwrap_or(defaults.log_sink),
        };

        if config.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("connect_timeout"));
        }
        if config.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("request_timeout"));
        }
        if config.compat.is_empty() {
            return Err(ConfigError::EmptyVersionRange(config.compat));
        }
        if config.session_token.is_some() && config.endpoint.is_none() {
            return Err(ConfigError::TokenWithoutEndpoint);
        }
        if let Some(base) = &config.distribution_base {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                return Err(ConfigError::DistributionBase(base.clone()));
            }
        }
        Ok(config)
    }
}

fn read_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}
