mod config;
mod console;
mod server;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use server::GameServer;

#[derive(Parser)]
#[command(name = "zone-server")]
#[command(about = "Zone game server")]
pub struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = zone::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = zone::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = zone::DEFAULT_SYNC_RATE, help = "Transform samples per second")]
    sync_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(short, long, default_value = "arena", help = "Level loaded at startup, empty for none")]
    level: String,

    #[arg(long, default_value_t = 2)]
    ai_players: usize,

    #[arg(
        long,
        default_value = "keep",
        help = "What happens to a leaving player's entity: keep or despawn"
    )]
    removal_policy: String,

    #[arg(long, help = "Asset catalog (TOML); the built-in catalog if omitted")]
    assets: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let bind_addr = format!("{}:{}", args.bind, args.port);
    let config = config::server_config(&args)?;
    let assets = config::asset_source(args.assets.as_deref())?;

    let mut server = GameServer::new(&bind_addr, config, assets)?;
    log::info!("Server started on {}", server.local_addr());

    server.run(console::spawn());
    log::info!("Server shutting down");
    Ok(())
}
