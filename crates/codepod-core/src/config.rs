//! Sandbox configuration types.

use crate::error::SandboxError;
use crate::extension::Extension;
use crate::mount::MountSpec;
use std::path::PathBuf;

/// Default per-command wall-clock timeout enforced by the runtime.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default cap on the sandbox's in-memory filesystem.
pub const DEFAULT_FS_LIMIT_BYTES: u64 = 256 * 1024 * 1024;

/// Configuration for creating a sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Script runtime that hosts the sandbox server (default: `bun`).
    pub runtime_path: PathBuf,
    /// Server entry point passed to the runtime.
    pub server_script: PathBuf,
    /// Directory holding the WASM command binaries.
    pub wasm_dir: PathBuf,
    /// Path to the shell WASM module.
    pub shell_wasm_path: PathBuf,
    /// Per-command timeout in milliseconds (default: 30000).
    pub timeout_ms: u64,
    /// Filesystem size limit in bytes (default: 256 MiB).
    pub fs_limit_bytes: u64,
    /// Extra PYTHONPATH entries inside the sandbox.
    pub python_path: Vec<String>,
    /// Host files mounted at creation time.
    pub mounts: Vec<MountSpec>,
    /// Extensions registered at creation time.
    pub extensions: Vec<Extension>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime_path: PathBuf::from("bun"),
            server_script: PathBuf::from("server.js"),
            wasm_dir: PathBuf::from("wasm"),
            shell_wasm_path: PathBuf::from("wasm/codepod-shell.wasm"),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            fs_limit_bytes: DEFAULT_FS_LIMIT_BYTES,
            python_path: Vec::new(),
            mounts: Vec::new(),
            extensions: Vec::new(),
        }
    }
}

impl SandboxConfig {
    /// Create a new config builder.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CODEPOD_RUNTIME` | `bun` |
    /// | `CODEPOD_SERVER_SCRIPT` | `server.js` |
    /// | `CODEPOD_WASM_DIR` | `wasm` |
    /// | `CODEPOD_SHELL_WASM` | `wasm/codepod-shell.wasm` |
    /// | `CODEPOD_TIMEOUT_MS` | `30000` |
    /// | `CODEPOD_FS_LIMIT_BYTES` | `268435456` |
    /// | `CODEPOD_PYTHON_PATH` | empty (`:`-separated) |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from `lookup`, which maps a variable name to
    /// its value. Unset or unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        let path = |key: &str, fallback: PathBuf| lookup(key).map(PathBuf::from).unwrap_or(fallback);

        Self {
            runtime_path: path("CODEPOD_RUNTIME", default.runtime_path),
            server_script: path("CODEPOD_SERVER_SCRIPT", default.server_script),
            wasm_dir: path("CODEPOD_WASM_DIR", default.wasm_dir),
            shell_wasm_path: path("CODEPOD_SHELL_WASM", default.shell_wasm_path),
            timeout_ms: lookup("CODEPOD_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.timeout_ms),
            fs_limit_bytes: lookup("CODEPOD_FS_LIMIT_BYTES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.fs_limit_bytes),
            python_path: lookup("CODEPOD_PYTHON_PATH")
                .map(|v| {
                    v.split(':')
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(default.python_path),
            mounts: default.mounts,
            extensions: default.extensions,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.runtime_path.as_os_str().is_empty() {
            return Err(SandboxError::Config("runtime_path is required".into()));
        }
        if self.server_script.as_os_str().is_empty() {
            return Err(SandboxError::Config("server_script is required".into()));
        }
        if self.timeout_ms == 0 {
            return Err(SandboxError::Config("timeout_ms must be > 0".into()));
        }
        if self.fs_limit_bytes == 0 {
            return Err(SandboxError::Config("fs_limit_bytes must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for SandboxConfig.
#[derive(Debug, Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    /// Start from an existing configuration (e.g. [`SandboxConfig::from_env`]).
    pub fn from_config(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Set the script runtime.
    pub fn runtime(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.runtime_path = path.into();
        self
    }

    /// Set the server entry point.
    pub fn server_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.server_script = path.into();
        self
    }

    /// Set the WASM binaries directory.
    pub fn wasm_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.wasm_dir = path.into();
        self
    }

    /// Set the shell WASM module.
    pub fn shell_wasm(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.shell_wasm_path = path.into();
        self
    }

    /// Set the per-command timeout.
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout_ms = ms;
        self
    }

    /// Set the filesystem size limit.
    pub fn fs_limit_bytes(mut self, bytes: u64) -> Self {
        self.config.fs_limit_bytes = bytes;
        self
    }

    /// Append a PYTHONPATH entry.
    pub fn python_path(mut self, path: impl Into<String>) -> Self {
        self.config.python_path.push(path.into());
        self
    }

    /// Mount files at creation time.
    pub fn mount(mut self, mount: MountSpec) -> Self {
        self.config.mounts.push(mount);
        self
    }

    /// Register an extension.
    pub fn extension(mut self, extension: Extension) -> Self {
        self.config.extensions.push(extension);
        self
    }

    /// Build the configuration, validating all required fields.
    pub fn build(self) -> Result<SandboxConfig, SandboxError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
