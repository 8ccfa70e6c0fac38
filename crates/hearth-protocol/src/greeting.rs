//! The startup greeting a spawned engine prints on stdout.

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::version::Version;

/// Exactly one greeting line is emitted by `hearth-engine session` once it
/// is ready to accept the connection, before anything else on stdout:
///
/// ```json
/// {"endpoint":"tcp://127.0.0.1:40331","version":"0.9.2","token":"9f2d..."}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Greeting {
    pub endpoint: Endpoint,
    pub version: Version,
    pub token: String,
}

impl Greeting {
    pub fn parse_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
