use std::sync::Arc;

use glam::Quat;

use super::{LoadProgress, drive_loader};
use crate::assets::AssetSource;
use crate::config::WorldConfig;
use crate::control::{AutonomousPolicy, ControlInput, PolicyContext, WanderPolicy};
use crate::level::LevelLoader;
use crate::message::Message;
use crate::net::NetLink;
use crate::notify::{Notification, Notifier};
use crate::physics::PhysicsSpace;
use crate::types::Role;
use crate::world::{World, WorldEvent};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub world: WorldConfig,
    pub name: String,
    /// Drive the local character with a wander policy instead of user input.
    pub bot: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            name: "player".to_string(),
            bot: false,
        }
    }
}

pub struct ClientSession {
    world: World,
    loader: LevelLoader,
    name: String,
    bot: Option<WanderPolicy>,
    pending_level: Option<String>,
    connected: bool,
}

impl ClientSession {
    pub fn new(
        config: ClientConfig,
        physics: Box<dyn PhysicsSpace>,
        assets: Arc<dyn AssetSource>,
        link: NetLink,
        notifier: Notifier,
    ) -> Self {
        let bot = config
            .bot
            .then(|| WanderPolicy::new(config.world.ai_seed ^ fastrand::u64(..)));
        let loader = LevelLoader::new(Arc::clone(&assets));
        let world = World::new(Role::Client, config.world, physics, assets, link, notifier);

        Self {
            world,
            loader,
            name: config.name,
            bot,
            pending_level: None,
            connected: true,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn loader(&self) -> &LevelLoader {
        &self.loader
    }

    /// `false` once the server went away.
    pub fn is_connected(&self) -> bool {
        self.connected && self.world.sync().is_linked()
    }

    pub fn update(&mut self, dt: f32) {
        for event in self.world.update(dt) {
            match event {
                WorldEvent::JoinAccepted {
                    player_id,
                    group_id,
                } => {
                    log::info!("Joined as player {} in group {}", player_id, group_id);
                    self.world.set_local_player(Some(player_id));
                    self.world
                        .notifier()
                        .status(format!("Joined as player {}", player_id));
                }
                WorldEvent::StartGame { level, .. } => self.on_start_game(level),
                WorldEvent::Chat { text, .. } => {
                    log::info!("{}", text);
                    self.world
                        .notifier()
                        .notify(Notification::ChatReceived { text });
                }
                WorldEvent::ClientDisconnected { .. } => {
                    log::warn!("Disconnected from server");
                    self.connected = false;
                    self.world.notifier().status("Disconnected");
                }
                WorldEvent::ClientConnected { .. } => {}
            }
        }

        match drive_loader(&mut self.loader, &mut self.world) {
            LoadProgress::Ready(level) => {
                if self.pending_level.as_deref() == Some(level.as_str()) {
                    self.pending_level = None;
                }
                self.start_pending();
            }
            LoadProgress::Failed | LoadProgress::Unloaded => self.start_pending(),
            LoadProgress::Pending => {}
        }

        if self.bot.is_some() {
            self.drive_bot(dt);
        }
    }

    fn on_start_game(&mut self, level: String) {
        if level.is_empty() {
            log::info!("Server closed the level");
            self.pending_level = None;
            self.world.close_level();
            self.loader.request_unload();
            return;
        }

        if self.loader.stage().is_loading() {
            self.pending_level = Some(level);
            return;
        }
        match self.world.level_name() {
            Some(current) if current == level => return,
            Some(_) => self.world.close_level(),
            None => {}
        }
        if let Err(e) = self.loader.start(&level) {
            log::error!("Cannot load level '{}': {}", level, e);
        }
    }

    fn start_pending(&mut self) {
        if let Some(level) = self.pending_level.take() {
            self.on_start_game(level);
        }
    }

    fn drive_bot(&mut self, dt: f32) {
        let Some(entity) = self.world.local_entity() else {
            return;
        };
        let Some(record) = self.world.entity(entity) else {
            return;
        };
        let physics = self.world.physics();
        let (Some(position), rotation) = (
            physics.position(record.body),
            physics.rotation(record.body).unwrap_or(Quat::IDENTITY),
        ) else {
            return;
        };

        let ctx = PolicyContext {
            position,
            rotation,
            dt,
            navmesh: self.world.navmesh(),
        };
        let input = match self.bot.as_mut() {
            Some(policy) => policy.decide(&ctx),
            None => return,
        };
        self.world.set_local_input(input);
    }

    pub fn set_input(&mut self, input: ControlInput) -> bool {
        self.world.set_local_input(input)
    }

    pub fn send_chat(&self, text: &str) {
        self.world.broadcast(Message::chat(text));
    }

    /// Asks the server to switch levels. An empty name closes the level.
    pub fn request_start(&self, level: &str) {
        self.world.broadcast(Message::StartGame {
            level: level.to_string(),
        });
    }
}
