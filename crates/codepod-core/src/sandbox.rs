//! Sandbox type - one logical sandbox on a shared runtime connection.

use crate::client::RpcClient;
use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::extension::ExtensionRegistry;
use crate::mount::MountSpec;
use crate::transport::{RuntimeProcess, Transport};
use crate::vfs::EntryKind;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The RPC engine and runtime process shared by a root sandbox and its forks.
struct Connection {
    client: Mutex<RpcClient>,
    process: Mutex<Option<RuntimeProcess>>,
}

/// A sandbox: an isolated shell, filesystem and Python runtime.
///
/// The root sandbox owns the runtime process. [`fork`](Self::fork) yields
/// further sandboxes on the same connection, told apart by a `sandboxId` that
/// is added to every request they send. Requests from all of them are
/// serialised through one lock, so only one is ever on the wire.
pub struct Sandbox {
    connection: Arc<Connection>,
    sandbox_id: Option<String>,
    closed: AtomicBool,
    created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("sandbox_id", &self.sandbox_id)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// Spawn a runtime and create a sandbox in it.
    ///
    /// This will:
    /// 1. Validate `config`
    /// 2. Start `<runtime> <server script>`
    /// 3. Register the extension handlers
    /// 4. Send `create` with the mounts, PYTHONPATH and extensions
    pub async fn create(config: SandboxConfig) -> Result<Self, SandboxError> {
        config.validate()?;
        let (process, transport) = RuntimeProcess::spawn(&config)?;
        Self::start(transport, Some(process), &config).await
    }

    /// Create a sandbox in a runtime that is already running on `transport`.
    pub async fn attach(transport: Transport, config: SandboxConfig) -> Result<Self, SandboxError> {
        config.validate()?;
        Self::start(transport, None, &config).await
    }

    async fn start(
        transport: Transport,
        process: Option<RuntimeProcess>,
        config: &SandboxConfig,
    ) -> Result<Self, SandboxError> {
        let start = std::time::Instant::now();
        let registry = Arc::new(ExtensionRegistry::from_extensions(&config.extensions));
        tracing::info!(
            extensions = config.extensions.len(),
            handlers = registry.len(),
            mounts = config.mounts.len(),
            timeout_ms = config.timeout_ms,
            "Creating sandbox"
        );

        let mut client = RpcClient::new(transport, registry);
        let _: Value = client.call("create", create_params(config)).await?;

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox ready"
        );

        Ok(Self {
            connection: Arc::new(Connection {
                client: Mutex::new(client),
                process: Mutex::new(process),
            }),
            sandbox_id: None,
            closed: AtomicBool::new(false),
            created_at: Utc::now(),
        })
    }

    /// The runtime-assigned id of a forked sandbox; `None` for the root.
    pub fn id(&self) -> Option<&str> {
        self.sandbox_id.as_deref()
    }

    /// True if this sandbox was produced by [`fork`](Self::fork).
    pub fn is_fork(&self) -> bool {
        self.sandbox_id.is_some()
    }

    /// Get the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Shell command execution.
    pub fn commands(&self) -> Commands<'_> {
        Commands { sandbox: self }
    }

    /// Sandbox filesystem access.
    pub fn files(&self) -> Files<'_> {
        Files { sandbox: self }
    }

    /// Mount host files into the running sandbox.
    pub async fn mount(&self, mount: &MountSpec) -> Result<(), SandboxError> {
        tracing::debug!(
            sandbox_id = ?self.sandbox_id,
            path = %mount.path(),
            files = mount.files().len(),
            "Mounting files"
        );
        let _: Value = self.call("mount", mount.to_params()).await?;
        Ok(())
    }

    /// Save the current filesystem and environment. Returns the snapshot id.
    pub async fn snapshot(&self) -> Result<String, SandboxError> {
        let resp: IdResponse = self.call("snapshot.create", json!({})).await?;
        tracing::debug!(sandbox_id = ?self.sandbox_id, snapshot_id = %resp.id, "Snapshot created");
        Ok(resp.id)
    }

    /// Return to a previous snapshot.
    pub async fn restore(&self, snapshot_id: &str) -> Result<(), SandboxError> {
        let _: Value = self
            .call("snapshot.restore", json!({ "id": snapshot_id }))
            .await?;
        Ok(())
    }

    /// Export the full sandbox state as an opaque blob.
    pub async fn export_state(&self) -> Result<Vec<u8>, SandboxError> {
        let resp: DataResponse = self.call("persistence.export", json!({})).await?;
        let blob = decode_base64(&resp.data)?;
        tracing::debug!(sandbox_id = ?self.sandbox_id, size = blob.len(), "State exported");
        Ok(blob)
    }

    /// Replace the sandbox state with a blob from [`export_state`](Self::export_state).
    pub async fn import_state(&self, blob: &[u8]) -> Result<(), SandboxError> {
        let data = general_purpose::STANDARD.encode(blob);
        let _: Value = self
            .call("persistence.import", json!({ "data": data }))
            .await?;
        Ok(())
    }

    /// Create an independent copy of this sandbox on the same runtime.
    pub async fn fork(&self) -> Result<Sandbox, SandboxError> {
        let resp: ForkResponse = self.call("sandbox.fork", json!({})).await?;
        tracing::info!(parent = ?self.sandbox_id, sandbox_id = %resp.sandbox_id, "Sandbox forked");
        Ok(Sandbox {
            connection: Arc::clone(&self.connection),
            sandbox_id: Some(resp.sandbox_id),
            closed: AtomicBool::new(false),
            created_at: Utc::now(),
        })
    }

    /// Destroy a forked sandbox.
    ///
    /// Only valid on forks; the root sandbox is shut down with
    /// [`kill`](Self::kill). Calling this on the root fails without
    /// contacting the runtime.
    pub async fn destroy(&self) -> Result<(), SandboxError> {
        let Some(sandbox_id) = self.sandbox_id.as_deref() else {
            return Err(SandboxError::Programming(
                "cannot destroy the root sandbox; use kill() instead".into(),
            ));
        };
        self.ensure_open()?;
        tracing::info!(sandbox_id = %sandbox_id, "Destroying sandbox");

        let mut client = self.connection.client.lock().await;
        let _: Value = client
            .call("sandbox.destroy", json!({ "sandboxId": sandbox_id }))
            .await?;
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Shut down the runtime process.
    ///
    /// This ends every sandbox on the connection, forks included. Best-effort:
    /// a failing `kill` request is logged and the process is stopped anyway.
    pub async fn kill(&self) {
        let start = std::time::Instant::now();
        tracing::info!(sandbox_id = ?self.sandbox_id, "Killing sandbox runtime");
        self.closed.store(true, Ordering::Relaxed);

        {
            let mut client = self.connection.client.lock().await;
            if !client.is_broken() {
                if let Err(e) = client.call::<_, Value>("kill", json!({})).await {
                    tracing::warn!(error = %e, "kill request failed");
                }
            }
            client.close().await;
        }

        let process = self.connection.process.lock().await.take();
        if let Some(process) = process {
            process.stop().await;
        }

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox runtime stopped"
        );
    }

    /// Release this sandbox: forks are destroyed, the root is killed.
    ///
    /// Never fails; errors are logged.
    pub async fn close(self) {
        if self.is_fork() {
            if let Err(e) = self.destroy().await {
                tracing::warn!(sandbox_id = ?self.sandbox_id, error = %e, "Failed to destroy forked sandbox");
            }
        } else {
            self.kill().await;
        }
    }

    /// Send `method` with this sandbox's id added to `params`.
    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, SandboxError> {
        self.ensure_open()?;
        let params = self.with_id(params);
        let mut client = self.connection.client.lock().await;
        client.call(method, params).await
    }

    fn with_id(&self, mut params: Value) -> Value {
        if let (Some(id), Value::Object(map)) = (&self.sandbox_id, &mut params) {
            map.insert("sandboxId".to_string(), Value::String(id.clone()));
        }
        params
    }

    fn ensure_open(&self) -> Result<(), SandboxError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(SandboxError::Programming(
                "sandbox has already been destroyed or killed".into(),
            ));
        }
        Ok(())
    }
}

fn create_params(config: &SandboxConfig) -> Value {
    let mut params = json!({
        "wasmDir": config.wasm_dir.to_string_lossy(),
        "shellWasmPath": config.shell_wasm_path.to_string_lossy(),
        "timeoutMs": config.timeout_ms,
        "fsLimitBytes": config.fs_limit_bytes,
    });
    if !config.mounts.is_empty() {
        params["mounts"] = config.mounts.iter().map(MountSpec::to_params).collect();
    }
    if !config.python_path.is_empty() {
        params["pythonPath"] = json!(config.python_path);
    }
    if !config.extensions.is_empty() {
        params["extensions"] = config.extensions.iter().map(|e| e.to_spec()).collect();
    }
    params
}

fn decode_base64(data: &str) -> Result<Vec<u8>, SandboxError> {
    general_purpose::STANDARD
        .decode(data)
        .map_err(|e| SandboxError::Decode(format!("invalid base64 from runtime: {e}")))
}

/// Shell command execution in a sandbox.
#[derive(Debug, Clone, Copy)]
pub struct Commands<'a> {
    sandbox: &'a Sandbox,
}

impl Commands<'_> {
    /// Run a shell command line.
    ///
    /// A non-zero exit code is a normal result, not an error.
    pub async fn run(&self, command: &str) -> Result<CommandResult, SandboxError> {
        tracing::debug!(sandbox_id = ?self.sandbox.sandbox_id, command = %command, "Running command");
        let result: CommandResult = self
            .sandbox
            .call("run", json!({ "command": command }))
            .await?;
        tracing::debug!(
            sandbox_id = ?self.sandbox.sandbox_id,
            exit_code = result.exit_code,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            "Command completed"
        );
        Ok(result)
    }
}

/// Filesystem access inside a sandbox.
#[derive(Debug, Clone, Copy)]
pub struct Files<'a> {
    sandbox: &'a Sandbox,
}

impl Files<'_> {
    /// Read a file's bytes.
    pub async fn read(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        let resp: DataResponse = self.sandbox.call("files.read", json!({ "path": path })).await?;
        decode_base64(&resp.data)
    }

    /// Create or replace a file.
    pub async fn write(&self, path: &str, data: impl AsRef<[u8]>) -> Result<(), SandboxError> {
        let data = general_purpose::STANDARD.encode(data.as_ref());
        let _: Value = self
            .sandbox
            .call("files.write", json!({ "path": path, "data": data }))
            .await?;
        Ok(())
    }

    /// List a directory.
    pub async fn list(&self, path: &str) -> Result<Vec<FileInfo>, SandboxError> {
        let resp: ListResponse = self.sandbox.call("files.list", json!({ "path": path })).await?;
        tracing::trace!(path = %path, count = resp.entries.len(), "Directory listed");
        Ok(resp.entries)
    }

    /// Create a directory.
    pub async fn mkdir(&self, path: &str) -> Result<(), SandboxError> {
        let _: Value = self.sandbox.call("files.mkdir", json!({ "path": path })).await?;
        Ok(())
    }

    /// Remove a file or directory.
    pub async fn rm(&self, path: &str) -> Result<(), SandboxError> {
        let _: Value = self.sandbox.call("files.rm", json!({ "path": path })).await?;
        Ok(())
    }

    /// Metadata for one path.
    pub async fn stat(&self, path: &str) -> Result<FileInfo, SandboxError> {
        self.sandbox.call("files.stat", json!({ "path": path })).await
    }
}

/// Result from command execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Process exit code.
    pub exit_code: i32,
    /// Wall-clock time spent inside the sandbox.
    #[serde(default)]
    pub execution_time_ms: f64,
    /// Which streams were cut short by output limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<BTreeMap<String, bool>>,
    /// Failure class reported by the runtime (e.g. a timeout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
}

impl CommandResult {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// File entry from a listing or stat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// File or directory name.
    pub name: String,
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Size in bytes.
    pub size: u64,
}

// Internal response types matching the runtime's JSON structure

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DataResponse {
    data: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    entries: Vec<FileInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForkResponse {
    sandbox_id: String,
}
