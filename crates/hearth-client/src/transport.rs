//! Line-framed channel to a running engine.
//!
//! One protocol frame per line, JSON-encoded. Opening the channel maps
//! failures to `Error::Connection`; anything that goes wrong on an open
//! channel is `Error::Transport`. After the handshake the Session splits
//! the transport so receives run on a background task while sends share
//! the write half behind a lock.

use std::fmt;
use std::time::Duration;

use hearth_protocol::{ClientMessage, Endpoint, EngineMessage};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::trace;

use crate::error::{Error, Result};

trait Channel: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Channel for T {}

async fn connect_stream(endpoint: &Endpoint, limit: Duration) -> Result<Box<dyn Channel>> {
    let connect = async {
        match endpoint {
            Endpoint::Tcp(authority) => TcpStream::connect(authority.as_str())
                .await
                .map(|stream| Box::new(stream) as Box<dyn Channel>),
            #[cfg(unix)]
            Endpoint::Unix(path) => UnixStream::connect(path)
                .await
                .map(|stream| Box::new(stream) as Box<dyn Channel>),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix socket endpoints require a unix platform",
            )),
        }
    };
    match tokio::time::timeout(limit, connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(Error::Connection(format!("{endpoint}: {e}"))),
        Err(_) => Err(Error::Connection(format!(
            "{endpoint}: timed out after {limit:?}"
        ))),
    }
}

/// Reachability check: connect within `limit` and drop the stream.
pub(crate) async fn probe(endpoint: &Endpoint, limit: Duration) -> Result<()> {
    connect_stream(endpoint, limit).await.map(|_| ())
}

/// Receiving half of a split transport.
pub(crate) struct RecvHalf {
    reader: BufReader<ReadHalf<Box<dyn Channel>>>,
}

impl RecvHalf {
    /// Read one frame. A clean EOF and a line that does not parse are both
    /// transport failures.
    pub(crate) async fn recv(&mut self) -> Result<EngineMessage> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| Error::Transport(format!("read: {e}")))?;
        if n == 0 {
            return Err(Error::Transport("connection closed by engine".to_string()));
        }
        trace!(frame = line.trim(), "received engine frame");
        serde_json::from_str(line.trim())
            .map_err(|e| Error::Transport(format!("malformed frame: {e}")))
    }
}

/// Sending half of a split transport.
pub(crate) struct SendHalf {
    writer: WriteHalf<Box<dyn Channel>>,
}

impl SendHalf {
    /// Write one frame as a JSON line and flush it.
    pub(crate) async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let line = message
            .to_json_line()
            .map_err(|e| Error::Transport(format!("encode frame: {e}")))?;
        trace!(frame = line.trim(), "sending client frame");
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Transport(format!("write: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("flush: {e}")))
    }

    /// Half-close the channel. Used at teardown, where errors are the
    /// caller's to swallow.
    pub(crate) async fn shutdown(&mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }
}

/// A connected, line-framed channel.
pub(crate) struct Transport {
    recv: RecvHalf,
    send: SendHalf,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

impl Transport {
    /// Connect to `endpoint` within `limit`.
    pub(crate) async fn open(endpoint: &Endpoint, limit: Duration) -> Result<Self> {
        let stream = connect_stream(endpoint, limit).await?;
        let (read, write) = tokio::io::split(stream);
        Ok(Self {
            recv: RecvHalf {
                reader: BufReader::new(read),
            },
            send: SendHalf { writer: write },
        })
    }

    pub(crate) async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        self.send.send(message).await
    }

    pub(crate) async fn recv(&mut self) -> Result<EngineMessage> {
        self.recv.recv().await
    }

    pub(crate) fn into_split(self) -> (RecvHalf, SendHalf) {
        (self.recv, self.send)
    }
}
