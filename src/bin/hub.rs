use std::net::SocketAddr;

use clap::Parser;
use notify_hub::{
    HubHandle,
    api::{ApiConfig, ApiState, IdentityResolver, spawn_api_server},
    config::{Config, read_config_file},
    protocol::{Envelope, NoticeLevel, SystemNotice},
};
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long)]
    file: Option<String>,

    /// Override the bind address from the config file
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Log at trace level
    #[arg(long)]
    verbose: bool,
}

fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("notify_hub", level),
        ("hub", level),
        ("tower_http", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let mut config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => Config::default(),
    }
    .with_env_overrides();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    config.hub.validate()?;

    if config.jwt_secret.is_none() {
        warn!("no JWT secret configured, all connections will be anonymous");
    }

    let hub = HubHandle::spawn(config.hub.clone());
    let identity = IdentityResolver::new(config.jwt_secret.as_deref());
    let state = ApiState::new(hub.clone(), identity);

    let addr = spawn_api_server(ApiConfig::from(&config), state).await?;
    info!("notification hub ready on ws://{addr}/api/v1/stream");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }

    info!("shutting down");
    let notice = SystemNotice::new(NoticeLevel::Warning, "shutdown", "hub shutting down");
    if let Err(e) = hub.broadcast_all(Envelope::system(&notice)).await {
        warn!("could not announce shutdown: {e}");
    }
    hub.shutdown().await?;

    Ok(())
}
