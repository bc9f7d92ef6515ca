//! Byte streams to the sandbox runtime and the process that owns them.
//!
//! The runtime's stdin and stdout are treated as one ordered duplex pipe of
//! newline-terminated lines. Its stderr carries diagnostics only and is
//! forwarded to `tracing`.

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;

/// How long [`RuntimeProcess::stop`] waits for a graceful exit before killing.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Read half of a transport: the runtime's output stream.
pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;

/// Write half of a transport: the runtime's input stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// The runtime's paired input/output streams.
pub struct Transport {
    pub(crate) reader: BoxedReader,
    pub(crate) writer: BoxedWriter,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

impl Transport {
    /// Wrap arbitrary streams: `reader` yields the runtime's output,
    /// `writer` feeds its input.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// A spawned sandbox runtime (`<runtime> <server script>`).
///
/// The child is killed if this handle is dropped without [`stop`](Self::stop).
#[derive(Debug)]
pub struct RuntimeProcess {
    child: Child,
}

impl RuntimeProcess {
    /// Spawn the runtime described by `config`.
    ///
    /// Returns the process handle and the transport over its stdio.
    pub fn spawn(config: &SandboxConfig) -> Result<(Self, Transport), SandboxError> {
        tracing::debug!(
            runtime = %config.runtime_path.display(),
            server = %config.server_script.display(),
            "Spawning sandbox runtime"
        );

        let mut child = Command::new(&config.runtime_path)
            .arg(&config.server_script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::error!(runtime = %config.runtime_path.display(), error = %e, "Runtime spawn failed");
                SandboxError::Spawn(e)
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Transport("runtime stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Transport("runtime stdout not captured".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let pid = child.id();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(pid, line = %line, "runtime stderr");
                }
            });
        }

        tracing::info!(pid = child.id(), "Sandbox runtime started");
        Ok((Self { child }, Transport::new(stdout, stdin)))
    }

    /// OS process id, if the process has not been reaped yet.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the runtime to exit, killing it after a grace period.
    ///
    /// Best-effort: errors are logged, never returned.
    pub async fn stop(mut self) {
        let pid = self.child.id();
        match timeout(STOP_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(pid, %status, "Sandbox runtime exited");
                return;
            }
            Ok(Err(e)) => tracing::warn!(pid, error = %e, "Waiting for runtime failed"),
            Err(_) => tracing::debug!(
                pid,
                grace_secs = STOP_GRACE.as_secs(),
                "Runtime still running, killing"
            ),
        }
        if let Err(e) = self.child.kill().await {
            tracing::warn!(pid, error = %e, "Failed to kill sandbox runtime");
        }
    }
}
