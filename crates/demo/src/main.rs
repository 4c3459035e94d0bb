use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use zone::{
    AssetCatalog, AssetSource, ClientConfig, ClientSession, FixedTimestep, MemoryHub,
    NetworkPump, Notifier, RapierSpace, ServerConfig, ServerSession, WorldConfig, link,
};

#[derive(Parser)]
#[command(name = "zone-demo")]
#[command(about = "Runs a server and bot clients in one process")]
struct Args {
    #[arg(short, long, default_value_t = 3)]
    bots: usize,

    #[arg(short, long, default_value_t = 10, help = "Seconds to run")]
    duration: u64,

    #[arg(long, default_value_t = 1)]
    ai_players: usize,

    #[arg(long, default_value = "arena")]
    level: String,
}

struct Bot {
    session: ClientSession,
    _pump: NetworkPump,
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let assets: Arc<dyn AssetSource> = Arc::new(AssetCatalog::builtin());
    let world = WorldConfig::default();
    let hub = MemoryHub::new();

    let (net, transport_link) = link();
    let _server_pump = NetworkPump::spawn(Box::new(hub.server()), transport_link);
    let mut server = ServerSession::new(
        ServerConfig {
            world: world.clone(),
            level: Some(args.level.clone()),
            ai_players: args.ai_players,
            ..Default::default()
        },
        Box::new(RapierSpace::new(world.dt())),
        Arc::clone(&assets),
        net,
        Notifier::disabled(),
    );

    let mut bots = Vec::with_capacity(args.bots);
    for i in 0..args.bots {
        let name = format!("demo-{}", i + 1);
        let transport = hub.connect(&name)?;
        let (net, transport_link) = link();
        let session = ClientSession::new(
            ClientConfig {
                world: world.clone(),
                name,
                bot: true,
            },
            Box::new(RapierSpace::new(world.dt())),
            Arc::clone(&assets),
            net,
            Notifier::disabled(),
        );
        bots.push(Bot {
            session,
            _pump: NetworkPump::spawn(Box::new(transport), transport_link),
        });
    }

    let mut timestep = FixedTimestep::new(world.tick_rate);
    let start = Instant::now();
    let mut last_tick_time = start;
    let mut last_report = start;
    let run_for = Duration::from_secs(args.duration);

    while start.elapsed() < run_for {
        let now = Instant::now();
        timestep.accumulate((now - last_tick_time).as_secs_f32());
        last_tick_time = now;

        while timestep.consume_tick() {
            server.update(timestep.dt());
            for bot in &mut bots {
                bot.session.update(timestep.dt());
            }
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            report(&server, &bots);
        }
        thread::sleep(Duration::from_millis(1));
    }

    report(&server, &bots);
    Ok(())
}

/// Logs how far each mirror is from the server's view of the same entities.
fn report(server: &ServerSession, bots: &[Bot]) {
    let world = server.world();
    log::info!(
        "server: level {:?}, {} players, {} entities",
        world.level_name(),
        world.players().len(),
        world.entities().len()
    );

    for bot in bots {
        let mirror = bot.session.world();
        let max_error = world
            .entities()
            .iter()
            .filter_map(|record| {
                let expected = world.entity_position(record.id)?;
                let actual = mirror.entity_position(record.id)?;
                Some(expected.distance(actual))
            })
            .fold(0.0_f32, f32::max);

        log::info!(
            "{}: {} players, {} entities, controls {:?}, max position error {:.3}",
            bot.session.name(),
            mirror.players().len(),
            mirror.entities().len(),
            mirror.local_entity(),
            max_error
        );
    }
}
