mod app;
mod input;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use zone::{AssetCatalog, AssetSource, ClientConfig, WorldConfig};

use app::App;

#[derive(Parser)]
#[command(name = "zone-client")]
#[command(about = "Headless zone client")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:27016",
        help = "Server address to connect to"
    )]
    server: String,

    #[arg(short, long, default_value = "player")]
    name: String,

    #[arg(long, help = "Drive the character with the wander policy")]
    bot: bool,

    #[arg(long, help = "Disconnect after this many seconds")]
    duration: Option<u64>,

    #[arg(long, help = "Asset catalog (TOML); the built-in catalog if omitted")]
    assets: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server_addr: SocketAddr = args
        .server
        .parse()
        .with_context(|| format!("invalid server address '{}'", args.server))?;

    let assets: Arc<dyn AssetSource> = match &args.assets {
        Some(path) => Arc::new(AssetCatalog::load(path)?),
        None => Arc::new(AssetCatalog::builtin()),
    };
    let config = ClientConfig {
        world: WorldConfig::default(),
        name: args.name,
        bot: args.bot,
    };

    let mut app = App::connect(server_addr, config, assets)?;
    app.run(input::spawn(), args.duration.map(Duration::from_secs));
    log::info!("Disconnected");
    Ok(())
}
