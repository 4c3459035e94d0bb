use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use zone::{
    AssetSource, ClientConfig, ClientSession, FixedTimestep, NetworkPump, Notification, Notifier,
    RapierSpace, UdpClientTransport, link,
};

use crate::input::UserLine;

/// Handshake timeout, and how long the server may stay silent afterwards.
const SERVER_TIMEOUT: Duration = Duration::from_secs(10);

/// A headless client: the session, its network pump and a fixed-step loop.
pub struct App {
    session: ClientSession,
    pump: NetworkPump,
    notifications: UnboundedReceiver<Notification>,
    timestep: FixedTimestep,
    last_tick_time: Instant,
}

impl App {
    pub fn connect(
        server_addr: SocketAddr,
        config: ClientConfig,
        assets: Arc<dyn AssetSource>,
    ) -> anyhow::Result<Self> {
        let transport = UdpClientTransport::connect(server_addr, &config.name, SERVER_TIMEOUT)?;
        log::info!("Connected to {} as client {}", server_addr, transport.client_id());

        let (net, transport_link) = link();
        let pump = NetworkPump::spawn(Box::new(transport), transport_link);
        let (notifier, notifications) = Notifier::channel();

        let timestep = FixedTimestep::new(config.world.tick_rate);
        let physics = Box::new(RapierSpace::new(timestep.dt()));
        let session = ClientSession::new(config, physics, assets, net, notifier);

        Ok(Self {
            session,
            pump,
            notifications,
            timestep,
            last_tick_time: Instant::now(),
        })
    }

    /// Runs until the server goes away, `/quit` is typed or `duration` elapses.
    pub fn run(&mut self, mut lines: UnboundedReceiver<UserLine>, duration: Option<Duration>) {
        let start = Instant::now();

        loop {
            if duration.is_some_and(|d| start.elapsed() >= d) {
                break;
            }
            if !self.session.is_connected() || !self.pump.is_running() {
                log::warn!("Lost connection to the server");
                break;
            }
            let mut quit = false;
            while let Ok(line) = lines.try_recv() {
                match line {
                    UserLine::Chat(text) => self.session.send_chat(&text),
                    UserLine::Level(level) => self.session.request_start(&level),
                    UserLine::Close => self.session.request_start(""),
                    UserLine::Quit => quit = true,
                }
            }
            if quit {
                break;
            }

            self.tick_once();
            std::thread::sleep(Duration::from_millis(1));
        }

        self.pump.shutdown();
    }

    fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.timestep.accumulate(delta.as_secs_f32());

        while self.timestep.consume_tick() {
            self.session.update(self.timestep.dt());
        }
        self.log_notifications();
    }

    fn log_notifications(&mut self) {
        while let Ok(notification) = self.notifications.try_recv() {
            match notification {
                Notification::ChatReceived { text } => println!("{}", text),
                Notification::StatusChanged { status } => log::info!("{}", status),
                Notification::PlayerListChanged { players } => {
                    let names: Vec<&str> = players.iter().map(|p| p.name.as_str()).collect();
                    log::info!("Players: {}", names.join(", "));
                }
                Notification::ControlledEntityChanged {
                    player_id,
                    entity_id,
                } => {
                    if Some(player_id) == self.session.world().local_player() {
                        log::info!("Now controlling {:?}", entity_id);
                    }
                }
                Notification::EffectTriggered {
                    effect, position, ..
                } => log::info!("Effect '{}' at {}", effect, position),
            }
        }
    }
}
