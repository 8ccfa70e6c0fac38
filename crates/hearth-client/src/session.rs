//! Engine sessions: connect, execute, close.
//!
//! `Session::connect` drives the phase machine `Unstarted → Provisioned →
//! TransportOpen → HandshakeOk → Ready`; a failed handshake tears down the
//! transport and any owned subprocess before the error surfaces. Each phase
//! value owns the live resources, so cancelling the connect future at an
//! await point releases them (the child is spawned with `kill_on_drop`, the
//! socket closes on drop).
//!
//! A live session splits its transport: a background reader task routes
//! each reply to the waiter registered under its sequence number, and the
//! write half sits behind an async lock so concurrent sends cannot
//! interleave frames. When the channel breaks, the reader records the
//! reason and drops all waiters; in-flight calls report the transport
//! failure and later calls report a session error until `close`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hearth_protocol::{
    ClientInfo, ClientMessage, EngineMessage, Reply, Version, PROTOCOL_REVISION,
};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::{self, Operation, Query};
use crate::provision::{self, EngineHandle, EngineProcess};
use crate::transport::{RecvHalf, SendHalf, Transport};

const CLIENT_NAME: &str = "hearth-client";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// State shared between a Session, its executors, and its reader task.
pub(crate) struct Shared {
    pub(crate) writer: tokio::sync::Mutex<SendHalf>,
    pub(crate) pending: parking_lot::Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    pub(crate) seq: AtomicU64,
    pub(crate) broken: parking_lot::Mutex<Option<String>>,
    pub(crate) default_timeout: Duration,
}

impl Shared {
    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn broken_reason(&self) -> Option<String> {
        self.broken.lock().clone()
    }

    /// Record the first break reason; later reports keep the original.
    pub(crate) fn mark_broken(&self, reason: &str) {
        let mut slot = self.broken.lock();
        if slot.is_none() {
            *slot = Some(reason.to_string());
        }
    }

    pub(crate) fn register_waiter(&self, seq: u64) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(seq, tx);
        rx
    }

    pub(crate) fn discard_waiter(&self, seq: u64) {
        self.pending.lock().remove(&seq);
    }

    /// Drop every registered waiter; their receivers resolve as closed.
    fn drain_waiters(&self) {
        self.pending.lock().clear();
    }
}

fn spawn_reader(shared: Arc<Shared>, mut recv: RecvHalf) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match recv.recv().await {
                Ok(EngineMessage::Reply(reply)) => {
                    let waiter = shared.pending.lock().remove(&reply.seq);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(reply);
                        }
                        // Timed-out or cancelled call; the reply dies here.
                        None => debug!(seq = reply.seq, "discarding reply with no waiter"),
                    }
                }
                Ok(EngineMessage::Fault { message }) => {
                    warn!(%message, "engine reported a session fault");
                    shared.mark_broken(&format!("engine fault: {message}"));
                    shared.drain_waiters();
                    break;
                }
                Ok(other) => {
                    warn!(?other, "protocol violation: unexpected frame");
                    shared.mark_broken("protocol violation: unexpected frame");
                    shared.drain_waiters();
                    break;
                }
                Err(e) => {
                    let reason = e.to_string();
                    debug!(%reason, "engine channel ended");
                    shared.mark_broken(&reason);
                    shared.drain_waiters();
                    break;
                }
            }
        }
    })
}

/// Connect phases. Each carries what it has acquired so far; see the
/// module docs for the cleanup guarantees.
enum ConnectPhase {
    Unstarted(Config),
    Provisioned {
        config: Config,
        handle: EngineHandle,
    },
    TransportOpen {
        config: Config,
        handle: EngineHandle,
        transport: Transport,
    },
    HandshakeOk {
        config: Config,
        handle: EngineHandle,
        transport: Transport,
        engine_version: Version,
    },
    Ready(Session),
}

/// A live, owned connection to a running engine.
///
/// Acquired with [`Session::connect`], released with [`Session::close`]
/// (idempotent) or, as a backstop, on drop. All query entry points take
/// `&self`, so one session can serve concurrent callers behind an `Arc`.
pub struct Session {
    shared: Arc<Shared>,
    engine_version: Version,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    process: parking_lot::Mutex<Option<EngineProcess>>,
    closed: AtomicBool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("engine_version", &self.engine_version)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Provision (or adopt) an engine, open the channel, and perform the
    /// version handshake.
    pub async fn connect(config: Config) -> Result<Self> {
        let mut phase = ConnectPhase::Unstarted(config);
        loop {
            phase = match phase {
                ConnectPhase::Unstarted(config) => {
                    let handle = provision::acquire(&config).await?;
                    ConnectPhase::Provisioned { config, handle }
                }
                ConnectPhase::Provisioned { config, mut handle } => {
                    match Transport::open(&handle.endpoint, config.connect_timeout).await {
                        Ok(transport) => ConnectPhase::TransportOpen {
                            config,
                            handle,
                            transport,
                        },
                        Err(e) => {
                            if let Some(process) = handle.process.take() {
                                process.kill().await;
                            }
                            return Err(e);
                        }
                    }
                }
                ConnectPhase::TransportOpen {
                    config,
                    mut handle,
                    mut transport,
                } => match handshake(&config, &handle, &mut transport).await {
                    Ok(engine_version) => {
                        if let Some(hint) = handle.version_hint {
                            if hint != engine_version {
                                warn!(greeting = %hint, welcome = %engine_version,
                                    "engine version differs between greeting and handshake");
                            }
                        }
                        ConnectPhase::HandshakeOk {
                            config,
                            handle,
                            transport,
                            engine_version,
                        }
                    }
                    Err(e) => {
                        drop(transport);
                        if let Some(process) = handle.process.take() {
                            process.shutdown().await;
                        }
                        return Err(e);
                    }
                },
                ConnectPhase::HandshakeOk {
                    config,
                    mut handle,
                    transport,
                    engine_version,
                } => {
                    let (recv, send) = transport.into_split();
                    let shared = Arc::new(Shared {
                        writer: tokio::sync::Mutex::new(send),
                        pending: parking_lot::Mutex::new(HashMap::new()),
                        seq: AtomicU64::new(1),
                        broken: parking_lot::Mutex::new(None),
                        default_timeout: config.request_timeout,
                    });
                    let reader = spawn_reader(Arc::clone(&shared), recv);
                    info!(version = %engine_version, "session established");
                    ConnectPhase::Ready(Session {
                        shared,
                        engine_version,
                        reader: parking_lot::Mutex::new(Some(reader)),
                        process: parking_lot::Mutex::new(handle.process.take()),
                        closed: AtomicBool::new(false),
                    })
                }
                ConnectPhase::Ready(session) => return Ok(session),
            };
        }
    }

    /// Version the engine reported during the handshake.
    pub fn engine_version(&self) -> Version {
        self.engine_version
    }

    /// Execute one query with the configured default timeout.
    pub async fn execute(&self, query: Query) -> Result<Value> {
        executor::execute(&self.shared, query, None).await
    }

    /// Execute one query with an explicit timeout for this call only.
    pub async fn execute_with_timeout(&self, query: Query, timeout: Duration) -> Result<Value> {
        executor::execute(&self.shared, query, Some(timeout)).await
    }

    /// Execute a typed operation and decode its result shape.
    pub async fn run<O: Operation>(&self, operation: &O) -> Result<O::Output> {
        executor::run(&self.shared, operation).await
    }

    /// Release the session: close the channel and terminate an owned
    /// engine. Idempotent, and never fails; teardown problems are logged.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("session already closed");
            return;
        }
        info!("closing session");
        self.shared.mark_broken("session closed");
        self.shared.drain_waiters();

        {
            let mut writer = self.shared.writer.lock().await;
            if let Err(e) = writer.send(&ClientMessage::Goodbye).await {
                debug!(error = %e, "goodbye not delivered");
            }
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "transport shutdown failed");
            }
        }

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.abort();
            let _ = reader.await;
        }

        let process = self.process.lock().take();
        if let Some(process) = process {
            process.shutdown().await;
        }
        debug!("session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            warn!("session dropped without close(); subprocess teardown falls to kill-on-drop");
        }
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

async fn handshake(
    config: &Config,
    handle: &EngineHandle,
    transport: &mut Transport,
) -> Result<Version> {
    let hello = ClientMessage::Hello {
        revision: PROTOCOL_REVISION,
        token: handle.token.clone(),
        client: ClientInfo {
            name: CLIENT_NAME.to_string(),
            version: CLIENT_VERSION.to_string(),
        },
    };
    let exchange = async {
        transport.send(&hello).await?;
        transport.recv().await
    };
    let answer = tokio::time::timeout(config.connect_timeout, exchange)
        .await
        .map_err(|_| {
            Error::Session(format!(
                "handshake timed out after {:?}",
                config.connect_timeout
            ))
        })??;

    match answer {
        EngineMessage::Welcome { revision, version } => {
            if revision != PROTOCOL_REVISION {
                return Err(Error::Session(format!(
                    "engine speaks protocol revision {revision}, this client speaks {PROTOCOL_REVISION}"
                )));
            }
            if !config.compat.contains(version) {
                return Err(Error::VersionMismatch {
                    engine: version,
                    required: config.compat,
                });
            }
            Ok(version)
        }
        EngineMessage::Fault { message } => Err(Error::Session(format!(
            "engine rejected the handshake: {message}"
        ))),
        other => Err(Error::Session(format!(
            "expected a welcome frame, got {other:?}"
        ))),
    }
}

/// Connect, hand the session to `f`, and always close before returning
/// `f`'s result. The session is shared as an `Arc` so the closure's future
/// can own its handle; clones kept beyond the call see a closed session.
pub async fn with_session<T, Fut, F>(config: Config, f: F) -> Result<T>
where
    F: FnOnce(Arc<Session>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let session = Arc::new(Session::connect(config).await?);
    let result = f(Arc::clone(&session)).await;
    session.close().await;
    result
}
