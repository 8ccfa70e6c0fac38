//! Connection coordinates for a running engine.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseEndpointError {
    #[error("empty endpoint string")]
    Empty,
    #[error("endpoint `{0}` uses an unsupported scheme (expected tcp:// or unix://)")]
    UnsupportedScheme(String),
    #[error("endpoint `{0}` is missing a port")]
    MissingPort(String),
    #[error("endpoint `{0}` has an invalid port")]
    InvalidPort(String),
    #[error("endpoint `{0}` has an empty socket path")]
    EmptyPath(String),
}

/// Where a running engine listens for sessions.
///
/// Serialized in coordinate-string form: `tcp://host:port` or
/// `unix:///path/to.sock`. A bare `host:port` parses as TCP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP authority in `host:port` form.
    Tcp(String),
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl Endpoint {
    fn parse_tcp(original: &str, authority: &str) -> Result<Self, ParseEndpointError> {
        let (_, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| ParseEndpointError::MissingPort(original.to_string()))?;
        if port.parse::<u16>().is_err() {
            return Err(ParseEndpointError::InvalidPort(original.to_string()));
        }
        Ok(Self::Tcp(authority.to_string()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(authority) => write!(f, "tcp://{authority}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseEndpointError::Empty);
        }
        if let Some(authority) = s.strip_prefix("tcp://") {
            return Self::parse_tcp(s, authority);
        }
        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(ParseEndpointError::EmptyPath(s.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = s.split_once("://") {
            return Err(ParseEndpointError::UnsupportedScheme(scheme.to_string()));
        }
        Self::parse_tcp(s, s)
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
