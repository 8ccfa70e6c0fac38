//! In-process engine double for tests.
//!
//! `MockEngine` binds an ephemeral TCP port, performs the handshake, and
//! answers queries from a script keyed by document substring. Each query is
//! answered on its own task, so delayed scripts exercise out-of-order reply
//! delivery. Compiled for tests and behind the `test-utils` feature; the
//! `mock-hearth-engine` binary wraps it for out-of-process runs.

use std::sync::Arc;
use std::time::Duration;

use hearth_protocol::{
    ClientMessage, Endpoint, EngineMessage, ErrorPayload, Reply, Version, PROTOCOL_REVISION,
};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::config::{Config, ConfigBuilder, DEFAULT_ENGINE_VERSION};

/// How the mock answers a query whose document matches a script key.
#[derive(Debug, Clone)]
pub enum Script {
    /// Reply with this data.
    Data(Value),
    /// Reply with these error payloads.
    Errors(Vec<ErrorPayload>),
    /// Reply with this data after the delay.
    DelayedData(Duration, Value),
    /// Never reply; the query hangs until the caller times out.
    Silent,
    /// Close the connection without replying.
    Hangup,
}

struct State {
    version: Version,
    revision: u32,
    token: String,
    require_token: bool,
    scripts: Vec<(String, Script)>,
}

impl State {
    fn script_for(&self, document: &str) -> Script {
        for (needle, script) in &self.scripts {
            if document.contains(needle) {
                return script.clone();
            }
        }
        Script::Data(json!({ "ok": true }))
    }
}

pub struct MockEngineBuilder {
    version: Version,
    revision: u32,
    token: Option<String>,
    require_token: bool,
    scripts: Vec<(String, Script)>,
}

impl MockEngineBuilder {
    /// Version the mock reports in its welcome frame.
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Protocol revision the mock claims. Defaults to the real one.
    pub fn revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }

    /// Fixed session token instead of a random one.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Whether a hello without the right token is rejected. On by default.
    pub fn require_token(mut self, require: bool) -> Self {
        self.require_token = require;
        self
    }

    /// Answer documents containing `needle` with `script`. First match
    /// wins; unmatched documents get `{"ok": true}`.
    pub fn script(mut self, needle: impl Into<String>, script: Script) -> Self {
        self.scripts.push((needle.into(), script));
        self
    }

    pub async fn start(self) -> MockEngine {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock engine listener");
        let endpoint = Endpoint::Tcp(
            listener
                .local_addr()
                .expect("mock engine local addr")
                .to_string(),
        );
        let state = Arc::new(State {
            version: self.version,
            revision: self.revision,
            token: self.token.unwrap_or_else(|| Uuid::new_v4().to_string()),
            require_token: self.require_token,
            scripts: self.scripts,
        });
        let token = state.token.clone();
        let version = state.version;
        let accept = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "mock engine accepted a connection");
                        tokio::spawn(serve_connection(stream, Arc::clone(&state)));
                    }
                    Err(_) => break,
                }
            }
        });
        MockEngine {
            endpoint,
            token,
            version,
            accept,
        }
    }
}

/// A running mock engine listening on an ephemeral local port.
pub struct MockEngine {
    endpoint: Endpoint,
    token: String,
    version: Version,
    accept: JoinHandle<()>,
}

impl MockEngine {
    /// Start with defaults: current engine version, random required token,
    /// every document answered with `{"ok": true}`.
    pub async fn start() -> Self {
        Self::builder().start().await
    }

    pub fn builder() -> MockEngineBuilder {
        MockEngineBuilder {
            version: DEFAULT_ENGINE_VERSION,
            revision: PROTOCOL_REVISION,
            token: None,
            require_token: true,
            scripts: Vec::new(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Connection parameters pointed at this mock, token included.
    pub fn config(&self) -> ConfigBuilder {
        Config::builder()
            .endpoint(self.endpoint())
            .session_token(self.token())
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve_connection(stream: TcpStream, state: Arc<State>) {
    let (read, write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let write = Arc::new(tokio::sync::Mutex::new(write));

    let first = match lines.next_line().await {
        Ok(Some(line)) => line,
        _ => return,
    };
    match serde_json::from_str::<ClientMessage>(&first) {
        Ok(ClientMessage::Hello { token, .. }) => {
            if state.require_token && token.as_deref() != Some(state.token.as_str()) {
                send_frame(
                    &write,
                    &EngineMessage::Fault {
                        message: "invalid session token".to_string(),
                    },
                )
                .await;
                return;
            }
            send_frame(
                &write,
                &EngineMessage::Welcome {
                    revision: state.revision,
                    version: state.version,
                },
            )
            .await;
        }
        _ => {
            send_frame(
                &write,
                &EngineMessage::Fault {
                    message: "expected a hello frame".to_string(),
                },
            )
            .await;
            return;
        }
    }

    while let Ok(Some(line)) = lines.next_line().await {
        let message = match serde_json::from_str::<ClientMessage>(&line) {
            Ok(message) => message,
            Err(_) => continue,
        };
        match message {
            ClientMessage::Query(body) => {
                let script = state.script_for(&body.document);
                let write = Arc::clone(&write);
                tokio::spawn(async move {
                    match script {
                        Script::Data(value) => {
                            send_frame(&write, &EngineMessage::Reply(Reply::data(body.seq, value)))
                                .await;
                        }
                        Script::Errors(errors) => {
                            send_frame(
                                &write,
                                &EngineMessage::Reply(Reply::errors(body.seq, errors)),
                            )
                            .await;
                        }
                        Script::DelayedData(delay, value) => {
                            tokio::time::sleep(delay).await;
                            send_frame(&write, &EngineMessage::Reply(Reply::data(body.seq, value)))
                                .await;
                        }
                        Script::Silent => {}
                        Script::Hangup => {
                            let mut write = write.lock().await;
                            let _ = write.shutdown().await;
                        }
                    }
                });
            }
            ClientMessage::Goodbye => break,
            ClientMessage::Hello { .. } => {
                send_frame(
                    &write,
                    &EngineMessage::Fault {
                        message: "unexpected second hello".to_string(),
                    },
                )
                .await;
                break;
            }
        }
    }
}

async fn send_frame(write: &tokio::sync::Mutex<OwnedWriteHalf>, frame: &EngineMessage) {
    let line = frame.to_json_line().expect("serialize mock frame");
    let mut write = write.lock().await;
    let _ = write.write_all(line.as_bytes()).await;
    let _ = write.flush().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use hearth_protocol::ClientInfo;

    fn hello(token: Option<&str>) -> ClientMessage {
        ClientMessage::Hello {
            revision: PROTOCOL_REVISION,
            token: token.map(str::to_string),
            client: ClientInfo {
                name: "test".to_string(),
                version: "0".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn welcomes_a_valid_hello() {
        let mock = MockEngine::start().await;
        let mut transport = Transport::open(&mock.endpoint(), Duration::from_secs(1))
            .await
            .unwrap();
        transport.send(&hello(Some(mock.token()))).await.unwrap();
        match transport.recv().await.unwrap() {
            EngineMessage::Welcome { revision, version } => {
                assert_eq!(revision, PROTOCOL_REVISION);
                assert_eq!(version, mock.version());
            }
            other => panic!("expected welcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn faults_on_a_bad_token() {
        let mock = MockEngine::start().await;
        let mut transport = Transport::open(&mock.endpoint(), Duration::from_secs(1))
            .await
            .unwrap();
        transport.send(&hello(Some("wrong"))).await.unwrap();
        match transport.recv().await.unwrap() {
            EngineMessage::Fault { message } => assert!(message.contains("token")),
            other => panic!("expected fault, got {other:?}"),
        }
    }
}
