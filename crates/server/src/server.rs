use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use zone::{
    AssetSource, FixedTimestep, NetworkPump, Notification, Notifier, RapierSpace, ServerConfig,
    ServerSession, UdpServerTransport, link,
};

use crate::console::Command;

/// Connection timeout for UDP clients.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GameServer {
    session: ServerSession,
    pump: NetworkPump,
    notifications: UnboundedReceiver<Notification>,
    timestep: FixedTimestep,
    local_addr: SocketAddr,
    last_tick_time: Instant,
    running: Arc<AtomicBool>,
}

impl GameServer {
    pub fn new(
        bind_addr: &str,
        config: ServerConfig,
        assets: Arc<dyn AssetSource>,
    ) -> anyhow::Result<Self> {
        let transport = UdpServerTransport::bind(bind_addr, config.max_clients, CLIENT_TIMEOUT)?;
        let local_addr = transport.local_addr();

        let (net, transport_link) = link();
        let pump = NetworkPump::spawn(Box::new(transport), transport_link);
        let (notifier, notifications) = Notifier::channel();

        let timestep = FixedTimestep::new(config.world.tick_rate);
        let physics = Box::new(RapierSpace::new(timestep.dt()));
        let session = ServerSession::new(config, physics, assets, net, notifier);

        Ok(Self {
            session,
            pump,
            notifications,
            timestep,
            local_addr,
            last_tick_time: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn run(&mut self, mut commands: UnboundedReceiver<Command>) {
        while self.running.load(Ordering::SeqCst) {
            while let Ok(command) = commands.try_recv() {
                self.execute(command);
            }
            self.tick_once();
            if !self.pump.is_running() {
                log::error!("Network pump stopped, shutting down");
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.pump.shutdown();
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.timestep.accumulate(delta.as_secs_f32());

        while self.timestep.consume_tick() {
            self.session.update(self.timestep.dt());
        }
        self.log_notifications();
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Say(text) => self.session.send_chat(&text),
            Command::Level(level) => {
                if let Err(e) = self.session.start_level(&level) {
                    log::warn!("Cannot start level '{}': {}", level, e);
                }
            }
            Command::Close => self.session.close_level(),
            Command::Players => {
                for player in self.session.world().players().iter() {
                    log::info!(
                        "  {} '{}' group {} {} entity {:?}",
                        player.id,
                        player.name,
                        player.group,
                        if player.is_human() { "human" } else { "ai" },
                        player.entity
                    );
                }
            }
            Command::Status => {
                let world = self.session.world();
                log::info!(
                    "Level {:?} ({:?}), {} players, {} entities",
                    world.level_name(),
                    self.session.loader().stage(),
                    world.players().len(),
                    world.entities().len()
                );
            }
            Command::Quit => self.running.store(false, Ordering::SeqCst),
        }
    }

    fn log_notifications(&mut self) {
        while let Ok(notification) = self.notifications.try_recv() {
            match notification {
                Notification::StatusChanged { status } => log::info!("{}", status),
                Notification::PlayerListChanged { players } => {
                    log::debug!("{} players", players.len())
                }
                Notification::ControlledEntityChanged {
                    player_id,
                    entity_id,
                } => log::debug!("Player {} controls {:?}", player_id, entity_id),
                Notification::EffectTriggered { effect, position, .. } => {
                    log::debug!("Effect '{}' at {}", effect, position)
                }
                // Already logged by the session.
                Notification::ChatReceived { .. } => {}
            }
        }
    }
}
