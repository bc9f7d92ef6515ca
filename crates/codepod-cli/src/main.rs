//! codepod command-line entry point.
//!
//! Boots one sandbox, mounts any host directories given with `--mount`,
//! runs each command in order and echoes its output. The exit code is the
//! last command's.
//!
//! ```text
//! codepod --mount ./tools:/mnt/tools 'ls /mnt/tools' 'sh /mnt/tools/build.sh'
//! ```

use anyhow::Context;
use clap::Parser;
use codepod_core::{LocalFs, MountSpec, Sandbox, SandboxConfig, SandboxConfigBuilder};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Mount a host directory, as HOST_DIR:SANDBOX_PATH (repeatable)
    #[arg(long = "mount", value_name = "HOST_DIR:SANDBOX_PATH", value_parser = parse_mount)]
    mounts: Vec<(PathBuf, String)>,

    /// Per-command time limit inside the sandbox
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Shell commands to run, in order
    #[arg(required = true)]
    commands: Vec<String>,
}

fn parse_mount(s: &str) -> Result<(PathBuf, String), String> {
    let (host, sandbox) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected HOST_DIR:SANDBOX_PATH, got {s:?}"))?;
    if host.is_empty() {
        return Err("host directory is empty".into());
    }
    if !sandbox.starts_with('/') {
        return Err(format!("sandbox path must be absolute: {sandbox:?}"));
    }
    Ok((PathBuf::from(host), sandbox.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("codepod_core=warn".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut builder = SandboxConfigBuilder::from_config(SandboxConfig::from_env());
    if let Some(ms) = cli.timeout_ms {
        builder = builder.timeout_ms(ms);
    }
    for (host, sandbox_path) in &cli.mounts {
        let fs = LocalFs::new(host.clone())
            .with_context(|| format!("cannot mount {}", host.display()))?;
        let mount = MountSpec::from_vfs(sandbox_path.as_str(), &fs)
            .with_context(|| format!("cannot read {}", host.display()))?;
        tracing::info!(host = %host.display(), path = %sandbox_path, files = mount.files().len(), "Staged mount");
        builder = builder.mount(mount);
    }
    let config = builder.build()?;
    tracing::debug!(?config, "Configuration loaded");

    let sandbox = Sandbox::create(config)
        .await
        .context("failed to start sandbox")?;

    let outcome = run_all(&sandbox, &cli.commands).await;
    sandbox.close().await;

    let exit_code = outcome?;
    Ok(ExitCode::from(u8::try_from(exit_code).unwrap_or(1)))
}

async fn run_all(sandbox: &Sandbox, commands: &[String]) -> anyhow::Result<i32> {
    let mut exit_code = 0;
    for command in commands {
        let result = sandbox
            .commands()
            .run(command)
            .await
            .with_context(|| format!("command failed: {command}"))?;

        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
        std::io::stdout().flush()?;

        if let Some(class) = &result.error_class {
            tracing::warn!(command = %command, error_class = %class, "Command did not complete");
        }
        exit_code = result.exit_code;
    }
    Ok(exit_code)
}
