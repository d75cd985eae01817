// lsd: send a signed power-management request to one or more lsdd hosts.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use log::info;
use lsd_client::{config, dispatch, resolve, Family, Intent};
use lsd_core::{auth, unix_time, KeyFingerprint, RequestKind};

#[derive(Parser)]
#[command(name = "lsd", version, about = "Send signed power-management requests over UDP")]
struct Cli {
    /// shutdown, reboot, standby, sleep, hibernate, abort, notify or query.
    #[arg(short, long)]
    request: RequestKind,
    /// Seconds before the action fires.
    #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(i32).range(0..))]
    timer: i32,
    /// Also send to the broadcast address of --interface.
    #[arg(short, long, requires = "interface")]
    broadcast: bool,
    /// Interface whose broadcast address is used.
    #[arg(short, long)]
    interface: Option<String>,
    /// Text shown on the target (notify) or alongside the confirmation prompt.
    #[arg(short, long, default_value = "")]
    message: String,
    /// Skip confirmation on the target.
    #[arg(short, long)]
    force: bool,
    /// Private key (PEM) that signs the request.
    #[arg(short = 'k', long = "key")]
    private_key: Option<PathBuf>,
    /// Daemon port on every target.
    #[arg(short, long)]
    port: Option<u16>,
    /// Use IPv6.
    #[arg(short = '6', long)]
    ipv6: bool,
    /// Seconds to wait for query replies.
    #[arg(short = 'T', long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,
    /// Query sends while nothing has replied.
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u32).range(1..))]
    tries: Option<u32>,
    /// Config file (default: ~/.config/lsd/lsd.toml, then /etc/lsd/lsd.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Host names or addresses of the targets.
    #[arg(required_unless_present = "broadcast")]
    targets: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut cfg = config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    if let Some(key) = cli.private_key {
        cfg.private_key = key;
    }
    if let Some(t) = cli.timeout {
        cfg.timeout_secs = t;
    }
    if let Some(n) = cli.tries {
        cfg.tries = n;
    }

    let signing_key = auth::load_signing_key(&cfg.private_key)?;
    info!(
        "signing with {} ({})",
        cfg.private_key.display(),
        KeyFingerprint::of(signing_key.verifying_key())
    );

    let family = if cli.ipv6 { Family::V6 } else { Family::V4 };
    let intent = Intent {
        kind: cli.request,
        timer: cli.timer,
        force: cli.force,
        message: cli.message,
    };

    let interface = if cli.broadcast { cli.interface } else { None };
    let hosts = cli.targets;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let broadcast = match interface.as_deref() {
            Some(name) => Some(resolve::broadcast_address_of(family, name)?),
            None => None,
        };
        let unicast = resolve::resolve_many(family, &hosts).await?;
        let targets = dispatch::targets(broadcast, &unicast, cfg.port);

        let socket = dispatch::open_socket(family, broadcast.is_some()).await?;

        if intent.kind == RequestKind::Query {
            let states = dispatch::collect_states(
                &socket,
                &intent,
                unix_time(),
                &cfg.private_key,
                &targets,
                Duration::from_secs(cfg.timeout_secs),
                cfg.tries,
            )
            .await?;
            if states.is_empty() {
                bail!("no host answered the query");
            }
            let now = unix_time();
            for (from, state) in states {
                match state.remaining(now) {
                    Some(left) => println!("{}: {}, fires in {}s", from.ip(), state, left),
                    None => println!("{}: {}", from.ip(), state),
                }
            }
            return Ok(());
        }

        let payload = dispatch::signed_payload(&intent, unix_time(), &cfg.private_key)?;
        let delivery = dispatch::send_all(&socket, &payload, &targets).await;
        for target in &delivery.sent {
            info!("sent {} ({} bytes) to {}", intent.kind, payload.len(), target.ip());
        }
        if delivery.sent.is_empty() {
            bail!(dispatch::DispatchError::NothingSent);
        }
        Ok::<(), anyhow::Error>(())
    })
}
