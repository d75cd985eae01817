// lsdd: listen for signed power-management requests and act on them.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use lsd_core::{auth, KeyFingerprint, ServerCore};
use lsd_daemon::{config, engine, Engine, Sinks};

#[derive(Parser)]
#[command(name = "lsdd", version, about = "Accept signed power-management requests over UDP")]
struct Cli {
    /// UDP port to listen on.
    #[arg(short, long)]
    port: Option<u16>,
    /// Public key (PEM) that verifies request signatures.
    #[arg(short = 'k', long = "key")]
    public_key: Option<PathBuf>,
    /// Log actions instead of performing them.
    #[arg(long)]
    dry_run: bool,
    /// Config file (default: ~/.config/lsd/lsdd.toml, then /etc/lsd/lsdd.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut cfg = config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    if let Some(key) = cli.public_key {
        cfg.public_key = key;
    }
    cfg.dry_run |= cli.dry_run;

    match auth::load_verifying_key(&cfg.public_key) {
        Ok(key) => info!(
            "verifying with {} ({})",
            cfg.public_key.display(),
            KeyFingerprint::of(&key)
        ),
        Err(e) => warn!("{}; requests will be rejected until it is readable", e),
    }

    let sinks = if cfg.dry_run {
        Sinks::log_only()
    } else {
        Sinks::system()
    };
    let core = ServerCore::new(cfg.public_key.clone()).with_disabled(cfg.disabled.clone());
    let engine = Engine::new(core, sinks, Duration::from_secs(cfg.confirm_timeout_secs));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let socket = engine::bind(cfg.port)
            .await
            .with_context(|| format!("binding UDP port {}", cfg.port))?;
        info!("listening on {}", socket.local_addr()?);
        tokio::select! {
            _ = engine.run(socket) => {}
            r = shutdown_signal() => r?,
        }
        info!("shutting down");
        Ok::<(), anyhow::Error>(())
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix). A pending action is dropped with the runtime.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
