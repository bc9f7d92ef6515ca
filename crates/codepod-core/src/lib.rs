//! # codepod-core
//!
//! Host-side client for the codepod WASM sandbox runtime.
//!
//! The runtime is a separate process driven over newline-delimited JSON-RPC
//! on its stdin/stdout. While a request is pending the runtime may call back
//! into the host to run a registered extension; those callbacks are served
//! inline before the outer request completes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   codepod-core (host)                    │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │    Sandbox      │────▶│  MountSpec               │   │
//! │  │  - commands()   │     │   ◀── VirtualFileSystem  │   │
//! │  │  - files()      │     │       (MemoryFs, LocalFs)│   │
//! │  │  - fork()       │     └──────────────────────────┘   │
//! │  └─────────────────┘                                    │
//! │           │ Arc<Mutex<_>> (shared with forks)            │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │   RpcClient     │────▶│  ExtensionRegistry       │   │
//! │  │  - call()       │     │  - dispatch() callbacks  │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │           │ Transport (stdin / stdout lines)             │
//! └───────────┼──────────────────────────────────────────────┘
//!             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │        sandbox runtime (RuntimeProcess, separate OS proc) │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use codepod_core::{Extension, ExtensionCall, ExtensionOutput, MemoryFs, MountSpec, Sandbox, SandboxConfig};
//!
//! # async fn example() -> codepod_core::Result<()> {
//! let upper = Extension::new("upper").command(
//!     |call: &ExtensionCall| -> anyhow::Result<ExtensionOutput> {
//!         Ok(ExtensionOutput::ok(call.stdin.to_uppercase()))
//!     },
//! );
//!
//! let config = SandboxConfig::builder()
//!     .runtime("/usr/local/bin/bun")
//!     .server_script("/opt/codepod/server.js")
//!     .extension(upper)
//!     .build()?;
//!
//! let sandbox = Sandbox::create(config).await?;
//!
//! let result = sandbox.commands().run("echo hello | upper").await?;
//! println!("Output: {}", result.stdout); // HELLO
//!
//! let fs = MemoryFs::from_files([("lib/utils.py", "def greet(): return 'hello'")])?;
//! sandbox.mount(&MountSpec::from_vfs("/mnt/pkg", &fs)?).await?;
//!
//! sandbox.files().write("/tmp/test.txt", "Hello, World!").await?;
//! let content = sandbox.files().read("/tmp/test.txt").await?;
//!
//! // Cleanup
//! sandbox.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! Each connection carries one request at a time. Forked sandboxes share
//! their parent's connection and take turns on it.

mod client;
mod config;
mod error;
mod extension;
mod mount;
pub mod protocol;
mod sandbox;
mod transport;
pub mod vfs;

pub use client::RpcClient;
pub use config::{SandboxConfig, SandboxConfigBuilder, DEFAULT_FS_LIMIT_BYTES, DEFAULT_TIMEOUT_MS};
pub use error::{Result, SandboxError};
pub use extension::{
    Extension, ExtensionCall, ExtensionHandler, ExtensionOutput, ExtensionRegistry, PythonPackage,
};
pub use mount::MountSpec;
pub use sandbox::{CommandResult, Commands, FileInfo, Files, Sandbox};
pub use transport::{RuntimeProcess, Transport};
pub use vfs::{DirEntry, EntryKind, FileStat, LocalFs, MemoryFs, VfsError, VirtualFileSystem};
