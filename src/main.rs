use clap::Parser;
use tracing_subscriber::EnvFilter;

use alarm_bridge::{
    parse_entity_ids, Config, Dispatcher, EventGateway, RelaySource, UpstreamSettings,
};

#[derive(Parser, Debug)]
#[command(name = "alarm-bridge")]
struct Args {
    /// Upstream server address
    #[arg(long, env = "RUSTPLUS_IP")]
    ip: String,

    /// Upstream server port
    #[arg(long, env = "RUSTPLUS_PORT")]
    port: u16,

    /// Account id used to authenticate upstream
    #[arg(long, env = "RUSTPLUS_STEAM_ID")]
    steam_id: u64,

    /// Session token used to authenticate upstream
    #[arg(long, env = "RUSTPLUS_PLAYER_TOKEN", allow_negative_numbers = true)]
    player_token: i64,

    /// Comma separated entity ids to monitor, e.g. "123,456"
    #[arg(long, env = "RUSTPLUS_ALARM_ENTITY_IDS")]
    entity_ids: String,

    /// Path to the routing config
    #[arg(long, env = "RUSTPLUS_BRIDGE_CONFIG")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("alarm_bridge=info")),
        )
        .init();

    let args = Args::parse();

    let entities = parse_entity_ids(&args.entity_ids)?;

    let cfg = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config {}: {}", args.config, e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        targets = cfg.targets.len(),
        rules = cfg.rules.len(),
        concurrency = cfg.settings.forward_concurrency,
        "config loaded"
    );

    let upstream = UpstreamSettings {
        host: args.ip,
        port: args.port,
        steam_id: args.steam_id,
        player_token: args.player_token,
    };

    let gateway = EventGateway::new(entities, Dispatcher::new(cfg));
    let mut source = RelaySource::connect(&upstream).await?;

    tokio::select! {
        res = gateway.run(&mut source) => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
        }
    }

    Ok(())
}
