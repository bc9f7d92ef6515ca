//! Error types for codepod-core.

use crate::vfs::VfsError;
use thiserror::Error;

/// Result type alias for codepod-core operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that can occur while driving a sandbox.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The runtime answered a request with an `error` object.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// Error code reported by the runtime
        code: i64,
        /// Error message reported by the runtime
        message: String,
    },

    /// The runtime's streams closed or produced a line that is not JSON.
    ///
    /// Fatal for the session: the engine never retries.
    #[error("transport error: {0}")]
    Transport(String),

    /// A local precondition was violated before any request was sent.
    #[error("programming error: {0}")]
    Programming(String),

    /// Invalid sandbox configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The runtime process could not be started.
    #[error("failed to spawn runtime: {0}")]
    Spawn(#[source] std::io::Error),

    /// A result did not have the shape the caller expected.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A base64 payload from the runtime could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Error from a host-side virtual filesystem.
    #[error("VFS error: {0}")]
    Vfs(#[from] VfsError),
}

impl SandboxError {
    /// True for infrastructure failures (the runtime is gone or talking garbage).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// The remote error code, if the runtime rejected the request.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}
