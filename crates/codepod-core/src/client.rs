//! JSON-RPC engine for the sandbox runtime.
//!
//! One request is in flight at a time. While it is pending the runtime may
//! send any number of callback requests; each is served inline from the same
//! read loop, answered with exactly one line, and the loop goes back to
//! waiting for the outer response.

use crate::error::SandboxError;
use crate::extension::ExtensionRegistry;
use crate::protocol::{CallbackResponse, Incoming, Request};
use crate::transport::{BoxedReader, BoxedWriter, Transport};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

/// Client end of the runtime's stdio protocol.
///
/// No timeout is applied here: a call blocks until the runtime answers or
/// its output stream closes. Time limits are enforced inside the sandbox.
/// Dropping a `call` future before its response arrives leaves the stream
/// out of step, so the client counts as broken from the moment a request is
/// written until its own response is read.
pub struct RpcClient {
    reader: BufReader<BoxedReader>,
    writer: BufWriter<BoxedWriter>,
    registry: Arc<ExtensionRegistry>,
    next_id: u64,
    broken: bool,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("next_id", &self.next_id)
            .field("broken", &self.broken)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Drive `transport`, serving callbacks from `registry`.
    pub fn new(transport: Transport, registry: Arc<ExtensionRegistry>) -> Self {
        Self {
            reader: BufReader::new(transport.reader),
            writer: BufWriter::new(transport.writer),
            registry,
            next_id: 1,
            broken: false,
        }
    }

    /// The callback registry this client serves.
    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    /// True once a transport failure or an abandoned call has made the
    /// client unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Send a JSON-RPC request and wait for response.
    ///
    /// # Type Parameters
    ///
    /// * `P` - Parameter type (must be Serialize)
    /// * `R` - Result type (must be DeserializeOwned)
    ///
    /// # Errors
    ///
    /// - [`SandboxError::Rpc`] if the runtime answers with an error.
    /// - [`SandboxError::Transport`] if the streams fail, close, carry a line
    ///   that is not JSON, or answer with another request's id. Also returned
    ///   for every call after that, or after a call was dropped mid-flight.
    /// - [`SandboxError::Json`] if the result does not deserialize into `R`.
    pub async fn call<P: Serialize, R: DeserializeOwned>(
        &mut self,
        method: &str,
        params: P,
    ) -> Result<R, SandboxError> {
        if self.broken {
            return Err(SandboxError::Transport(
                "connection is unusable after a failed or abandoned call".into(),
            ));
        }
        let params = serde_json::to_value(params)?;

        // Stays set if this future is dropped before the response is read.
        self.broken = true;
        let result = self.round_trip(method, params).await;
        self.broken = matches!(result, Err(SandboxError::Transport(_)));
        let result = result?;
        serde_json::from_value(result).map_err(SandboxError::from)
    }

    async fn round_trip(&mut self, method: &str, params: Value) -> Result<Value, SandboxError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = Request::new(id, method, params);
        tracing::debug!(method = %method, id, "Sending RPC request");
        self.write_message(&request).await?;

        loop {
            let line = self.read_line().await?;

            let incoming = Incoming::parse(&line).map_err(|e| {
                tracing::warn!(method = %method, id, error = %e, "Undecodable line from runtime");
                SandboxError::Transport(format!("invalid message from runtime: {e}"))
            })?;

            match incoming {
                Incoming::Callback(callback) => {
                    tracing::debug!(
                        method = %method,
                        id,
                        callback_id = %callback.id,
                        callback_method = %callback.method,
                        "Servicing callback during pending call"
                    );
                    let response: CallbackResponse = self.registry.dispatch(&callback);
                    self.write_message(&response).await?;
                }
                Incoming::Response(response) => {
                    if response.id != Value::from(id) {
                        tracing::warn!(method = %method, id, got = %response.id, "Response id does not match request");
                        return Err(SandboxError::Transport(format!(
                            "response id {} does not match request {id}",
                            response.id
                        )));
                    }
                    if let Some(error) = response.error {
                        tracing::debug!(method = %method, id, code = error.code, message = %error.message, "RPC error response");
                        return Err(SandboxError::Rpc {
                            code: error.code,
                            message: error.message,
                        });
                    }
                    tracing::debug!(method = %method, id, "RPC call successful");
                    return Ok(response.result.unwrap_or(Value::Null));
                }
            }
        }
    }

    /// Write one message as a single newline-terminated line and flush.
    async fn write_message<T: Serialize>(&mut self, message: &T) -> Result<(), SandboxError> {
        let line = serde_json::to_string(message)?;
        tracing::trace!(line = %line, "-> runtime");

        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(write_failed)?;
        self.writer.write_all(b"\n").await.map_err(write_failed)?;
        self.writer.flush().await.map_err(write_failed)
    }

    /// Read the next non-blank line. End of stream is an error.
    async fn read_line(&mut self) -> Result<String, SandboxError> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await.map_err(|e| {
                tracing::warn!(error = %e, "RPC read error");
                SandboxError::Transport(format!("read from runtime failed: {e}"))
            })?;

            if bytes_read == 0 {
                tracing::warn!("Runtime closed its output stream");
                return Err(SandboxError::Transport(
                    "runtime closed its output stream".into(),
                ));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            tracing::trace!(line = %trimmed, "<- runtime");
            return Ok(trimmed.to_string());
        }
    }

    /// Close the runtime's input stream. Best-effort.
    pub async fn close(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!(error = %e, "Closing runtime input failed");
        }
        self.broken = true;
    }
}

fn write_failed(e: std::io::Error) -> SandboxError {
    tracing::warn!(error = %e, "RPC write error");
    SandboxError::Transport(format!("write to runtime failed: {e}"))
}
