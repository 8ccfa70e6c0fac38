//! Engine subprocess spawn and lifetime.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use hearth_protocol::Greeting;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{Config, LogSink};
use crate::error::{Error, Result};

/// How long a terminating engine gets before it is killed.
pub(crate) const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// Ownership token for a locally spawned engine.
///
/// Exactly one holder at a time: the Provisioner until the handshake
/// completes, the Session afterwards. The holder is responsible for
/// termination; `kill_on_drop` backstops a token that is dropped instead.
#[derive(Debug)]
pub(crate) struct EngineProcess {
    child: Child,
    log_pumps: Vec<JoinHandle<()>>,
}

/// Start `bin session` and wait for its startup greeting.
///
/// The greeting must be the first line on stdout within the connect
/// timeout. On any failure the child is killed before the error returns,
/// so a half-started engine is never handed back.
pub(crate) async fn spawn_engine(bin: &Path, config: &Config) -> Result<(EngineProcess, Greeting)> {
    let mut command = Command::new(bin);
    command.arg("session");
    if let Some(workdir) = &config.workdir {
        command.arg("--workdir").arg(workdir);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(match config.log_sink {
        LogSink::Stderr => Stdio::inherit(),
        LogSink::Discard => Stdio::null(),
        _ => Stdio::piped(),
    });
    command.kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| Error::Provision(format!("spawn {}: {e}", bin.display())))?;
    debug!(pid = child.id(), bin = %bin.display(), "spawned engine");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Provision("engine stdout was not captured".to_string()))?;
    let mut stdout = BufReader::new(stdout);

    let greeting = match read_greeting(&mut stdout, config.connect_timeout).await {
        Ok(greeting) => greeting,
        Err(e) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(e);
        }
    };
    debug!(endpoint = %greeting.endpoint, version = %greeting.version, "engine greeted");

    // Whatever the engine writes after the greeting is log traffic.
    let mut log_pumps = vec![spawn_log_pump(stdout, config.log_sink.clone(), "stdout")];
    if let Some(stderr) = child.stderr.take() {
        log_pumps.push(spawn_log_pump(
            BufReader::new(stderr),
            config.log_sink.clone(),
            "stderr",
        ));
    }

    Ok((EngineProcess { child, log_pumps }, greeting))
}

async fn read_greeting(
    stdout: &mut BufReader<ChildStdout>,
    limit: Duration,
) -> Result<Greeting> {
    let mut line = String::new();
    match tokio::time::timeout(limit, stdout.read_line(&mut line)).await {
        Ok(Ok(0)) => Err(Error::Provision(
            "engine exited before printing its greeting".to_string(),
        )),
        Ok(Ok(_)) => Greeting::parse_line(&line)
            .map_err(|e| Error::Provision(format!("bad greeting line: {e}"))),
        Ok(Err(e)) => Err(Error::Provision(format!("read greeting: {e}"))),
        Err(_) => Err(Error::Provision(format!(
            "engine produced no greeting within {limit:?}"
        ))),
    }
}

fn spawn_log_pump<R>(mut reader: R, sink: LogSink, stream: &'static str) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut file = match &sink {
            LogSink::File(path) => match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
            {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot open engine log file");
                    None
                }
            },
            _ => None,
        };

        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => match (&sink, &mut file) {
                    (LogSink::File(_), Some(file)) => {
                        use tokio::io::AsyncWriteExt;
                        if file.write_all(line.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    (LogSink::Stderr, _) => eprint!("{line}"),
                    (LogSink::Discard, _) => {}
                    // Tracing, or a File sink whose file failed to open.
                    _ => debug!(target: "hearth::engine", stream, line = line.trim_end()),
                },
                Err(e) => {
                    debug!(stream, error = %e, "engine log stream ended");
                    break;
                }
            }
        }
    })
}

impl EngineProcess {
    pub(crate) fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Graceful stop: polite signal first, then kill once the grace period
    /// runs out. Never returns an error; teardown reports through logs.
    pub(crate) async fn shutdown(mut self) {
        self.stop_pumps();
        if self.terminate_gracefully().await {
            return;
        }
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "engine already gone at kill time");
        }
        if let Err(e) = self.child.wait().await {
            warn!(error = %e, "failed to reap engine");
        }
    }

    /// Immediate kill, for handshakes that never completed.
    pub(crate) async fn kill(mut self) {
        self.stop_pumps();
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "engine already gone at kill time");
        }
        let _ = self.child.wait().await;
    }

    #[cfg(unix)]
    async fn terminate_gracefully(&mut self) -> bool {
        let Some(pid) = self.child.id() else {
            return false;
        };
        unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        match tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "engine exited after SIGTERM");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "waiting for engine exit failed");
                false
            }
            Err(_) => {
                warn!(grace = ?TERMINATE_GRACE, "engine ignored SIGTERM, killing");
                false
            }
        }
    }

    #[cfg(not(unix))]
    async fn terminate_gracefully(&mut self) -> bool {
        false
    }

    fn stop_pumps(&mut self) {
        for pump in self.log_pumps.drain(..) {
            pump.abort();
        }
    }
}
