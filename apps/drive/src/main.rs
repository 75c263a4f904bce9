mod commands;
mod config;
mod notices;
mod session;

use std::path::PathBuf;

use analysis::ChainPolicy;
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::DriveConfig;

const DEFAULT_LOG_FILTER: &str = "speedtrap_drive=info,analysis=info,ledger_client=info";

#[derive(Parser, Debug)]
#[command(name = "speedtrap-drive", version, about = "Speed camera alerts and segment average speed")]
struct Cli {
    /// Config file, defaults to <config_dir>/speedtrap/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// tracing filter, e.g. "speedtrap_drive=debug"; RUST_LOG wins if set
    #[arg(long, global = true)]
    log_filter: Option<String>,

    /// Server base URL
    #[arg(long, global = true)]
    server: Option<String>,

    /// Session cookie sent with every request
    #[arg(long, global = true)]
    cookie: Option<String>,

    #[arg(long, global = true)]
    user_id: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Track a live drive from UDP position datagrams
    Drive {
        /// Listen address, e.g. 0.0.0.0:5599
        #[arg(long)]
        bind: Option<String>,
        /// Also write every accepted fix to this NDJSON trace
        #[arg(long)]
        record: Option<PathBuf>,
        /// Let the closing camera start the next segment
        #[arg(long)]
        chain: bool,
    },
    /// Feed a recorded CSV/NDJSON trace through the tracker
    Replay {
        trace: PathBuf,
        /// Playback rate, 0 for as fast as possible
        #[arg(long, default_value_t = 1.0)]
        speedup: f64,
        #[arg(long)]
        chain: bool,
    },
    /// List the cameras the server knows about
    Cameras,
    /// Ask whether an ordered camera pair is an official segment
    CheckSegment { first: i64, second: i64 },
}

fn init_tracing(filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_LOG_FILTER)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_filter.as_deref());

    let mut cfg = DriveConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.server {
        cfg.server.base_url = url;
    }
    if let Some(cookie) = cli.cookie {
        cfg.server.session_cookie = Some(cookie);
    }
    if cli.user_id.is_some() {
        cfg.server.user_id = cli.user_id;
    }

    match cli.command {
        Command::Drive { bind, record, chain } => {
            if let Some(addr) = bind {
                cfg.udp.bind_addr = addr;
            }
            if chain {
                cfg.tracker.chain_policy = ChainPolicy::ReopenAtEnd;
            }
            let summary = commands::drive(&cfg, record.as_deref()).await?;
            info!("{}", serde_json::to_string(&summary)?);
        }
        Command::Replay { trace, speedup, chain } => {
            if chain {
                cfg.tracker.chain_policy = ChainPolicy::ReopenAtEnd;
            }
            let summary = commands::replay(&cfg, &trace, speedup).await?;
            info!("{}", serde_json::to_string(&summary)?);
        }
        Command::Cameras => commands::cameras(&cfg).await?,
        Command::CheckSegment { first, second } => {
            commands::check_segment(&cfg, first, second).await?;
        }
    }
    Ok(())
}
