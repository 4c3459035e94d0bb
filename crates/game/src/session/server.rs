use std::sync::Arc;

use glam::Quat;

use super::{LoadProgress, drive_loader};
use crate::assets::AssetSource;
use crate::config::WorldConfig;
use crate::level::{LevelLoader, LoadError};
use crate::message::{Message, wire_quat};
use crate::net::NetLink;
use crate::notify::{Notification, Notifier};
use crate::physics::PhysicsSpace;
use crate::types::{AiKind, ClientId, EntityId, GroupId, Peer, PlayerId, Role};
use crate::world::{World, WorldEvent};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub world: WorldConfig,
    pub max_clients: usize,
    /// Level loaded at startup.
    pub level: Option<String>,
    /// Autonomous players spawned whenever a level becomes ready.
    pub ai_players: usize,
    pub character_model: String,
    pub human_group: GroupId,
    pub ai_group: GroupId,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            max_clients: 32,
            level: Some("arena".to_string()),
            ai_players: 2,
            character_model: "soldier.model".to_string(),
            human_group: 0,
            ai_group: 1,
        }
    }
}

pub struct ServerSession {
    world: World,
    loader: LevelLoader,
    config: ServerConfig,
    ai_players: Vec<PlayerId>,
    next_spawn: usize,
}

impl ServerSession {
    pub fn new(
        config: ServerConfig,
        physics: Box<dyn PhysicsSpace>,
        assets: Arc<dyn AssetSource>,
        link: NetLink,
        notifier: Notifier,
    ) -> Self {
        let loader = LevelLoader::new(Arc::clone(&assets))
            .with_preload(&[config.character_model.as_str()]);
        let world = World::new(
            Role::Server,
            config.world.clone(),
            physics,
            assets,
            link,
            notifier,
        );

        let mut session = Self {
            world,
            loader,
            config,
            ai_players: Vec::new(),
            next_spawn: 0,
        };
        if let Some(level) = session.config.level.clone() {
            if let Err(e) = session.start_level(&level) {
                log::error!("Failed to start level '{}': {}", level, e);
            }
        }
        session
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn loader(&self) -> &LevelLoader {
        &self.loader
    }

    pub fn is_level_ready(&self) -> bool {
        self.loader.is_ready()
    }

    pub fn update(&mut self, dt: f32) {
        for event in self.world.update(dt) {
            match event {
                WorldEvent::ClientConnected { client, name } => self.on_connected(client, &name),
                WorldEvent::ClientDisconnected { client } => self.on_disconnected(client),
                WorldEvent::Chat { from, text } => self.on_chat(from, &text),
                WorldEvent::StartGame { from, level } => {
                    log::info!("{:?} requested level '{}'", from, level);
                    if level.is_empty() {
                        self.close_level();
                    } else if let Err(e) = self.start_level(&level) {
                        log::warn!("Cannot start level '{}': {}", level, e);
                    }
                }
                WorldEvent::JoinAccepted { .. } => {}
            }
        }

        match drive_loader(&mut self.loader, &mut self.world) {
            LoadProgress::Ready(level) => self.on_level_ready(&level),
            LoadProgress::Unloaded => self.finish_close(),
            LoadProgress::Pending | LoadProgress::Failed => {}
        }
    }

    pub fn start_level(&mut self, level: &str) -> Result<(), LoadError> {
        if self.loader.stage().is_loading() {
            return Err(LoadError::Busy(
                self.loader.level().unwrap_or_default().to_string(),
            ));
        }
        if self.world.level_name().is_some() {
            self.close_level();
        }
        self.loader.start(level)
    }

    /// Closes the level, deferred until the running load completes if there
    /// is one.
    pub fn close_level(&mut self) {
        if self.loader.request_unload() {
            self.finish_close();
        }
    }

    fn finish_close(&mut self) {
        self.remove_ai_players();
        self.world.close_level();
    }

    pub fn send_chat(&mut self, text: &str) {
        self.relay_chat(format!("server: {}", text));
    }

    fn on_connected(&mut self, client: ClientId, name: &str) {
        for message in self.world.catch_up_messages() {
            self.world.send_to(client, message);
        }

        let group = self.config.human_group;
        let player = match self.world.add_player(name, group, None, Some(client)) {
            Ok(player) => player,
            Err(e) => {
                log::error!("Failed to add player for client {}: {}", client, e);
                return;
            }
        };
        self.world.send_to(
            client,
            Message::JoinAccepted {
                player_id: player,
                group_id: group,
            },
        );
        self.world
            .notifier()
            .status(format!("'{}' joined as player {}", name, player));

        if self.loader.is_ready() {
            self.spawn_character(player);
        }
    }

    fn on_disconnected(&mut self, client: ClientId) {
        match self.world.players().by_client(client) {
            Some(player) => {
                self.world.remove_player(player);
            }
            None => log::debug!("Client {} left without a player", client),
        }
    }

    fn on_chat(&mut self, from: Peer, text: &str) {
        let name = match from {
            Peer::Client(client) => self
                .world
                .players()
                .by_client(client)
                .and_then(|p| self.world.player(p))
                .map(|p| p.name.clone()),
            Peer::Server => Some("server".to_string()),
        };
        let Some(name) = name else {
            log::warn!("Chat from {:?} without a player", from);
            return;
        };
        self.relay_chat(format!("{}: {}", name, text));
    }

    fn relay_chat(&mut self, text: String) {
        let message = Message::chat(&text);
        let Message::ChatText { text } = &message else {
            return;
        };
        log::info!("{}", text);
        self.world
            .notifier()
            .notify(Notification::ChatReceived { text: text.clone() });
        self.world.broadcast(message);
    }

    fn on_level_ready(&mut self, level: &str) {
        self.world.broadcast(Message::StartGame {
            level: level.to_string(),
        });
        self.next_spawn = 0;

        let props = self
            .world
            .level_data()
            .map(|data| data.props.clone())
            .unwrap_or_default();
        for prop in props {
            let position = glam::Vec3::from_array(prop.position);
            if let Err(e) = self
                .world
                .add_entity(&prop.model, position, wire_quat(prop.rotation))
            {
                log::error!("Failed to place '{}': {}", prop.model, e);
            }
        }

        let waiting: Vec<PlayerId> = self
            .world
            .players()
            .human_players()
            .iter()
            .filter(|p| p.entity.is_none())
            .map(|p| p.id)
            .collect();
        for player in waiting {
            self.spawn_character(player);
        }

        for i in 0..self.config.ai_players {
            let name = format!("bot-{}", i + 1);
            match self
                .world
                .add_player(&name, self.config.ai_group, Some(AiKind::Default), None)
            {
                Ok(player) => {
                    self.ai_players.push(player);
                    self.spawn_character(player);
                }
                Err(e) => log::error!("Failed to add '{}': {}", name, e),
            }
        }
    }

    fn spawn_character(&mut self, player: PlayerId) -> Option<EntityId> {
        let position = self
            .world
            .level_data()
            .map(|data| data.spawn_point(self.next_spawn))?;
        self.next_spawn += 1;

        match self
            .world
            .add_entity(&self.config.character_model, position, Quat::IDENTITY)
        {
            Ok(entity) => {
                self.world.enter_entity(player, Some(entity));
                Some(entity)
            }
            Err(e) => {
                log::error!("Failed to spawn a character for player {}: {}", player, e);
                None
            }
        }
    }

    fn remove_ai_players(&mut self) {
        for player in std::mem::take(&mut self.ai_players) {
            self.world.remove_player(player);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::assets::AssetCatalog;
    use crate::message::MAX_CHAT_CHARS;
    use crate::net::{Inbound, Outbound, Target, TransportLink, link};
    use crate::physics::RapierSpace;

    fn session(config: ServerConfig) -> (ServerSession, TransportLink) {
        let (net, transport) = link();
        let physics = Box::new(RapierSpace::new(config.world.dt()));
        let session = ServerSession::new(
            config,
            physics,
            Arc::new(AssetCatalog::builtin()),
            net,
            Notifier::disabled(),
        );
        (session, transport)
    }

    fn run_until_ready(session: &mut ServerSession) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !session.is_level_ready() {
            assert!(Instant::now() < deadline, "level did not load");
            session.update(1.0 / 60.0);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn drain(transport: &mut TransportLink) -> Vec<Outbound> {
        std::iter::from_fn(|| transport.try_next_outbound()).collect()
    }

    #[test]
    fn ready_level_spawns_props_and_ai_players() {
        let (mut server, mut transport) = session(ServerConfig {
            ai_players: 2,
            ..Default::default()
        });
        run_until_ready(&mut server);

        let world = server.world();
        assert_eq!(world.level_name(), Some("arena"));
        // Four props plus one character per bot.
        assert_eq!(world.entities().len(), 6);
        assert_eq!(world.players().len(), 2);
        assert!(world.players().iter().all(|p| p.entity.is_some()));

        let sent = drain(&mut transport);
        assert!(sent.iter().any(|o| o.target == Target::AllClients
            && o.message
                == Message::StartGame {
                    level: "arena".to_string()
                }));
    }

    #[test]
    fn joining_client_gets_catch_up_then_a_character() {
        let (mut server, mut transport) = session(ServerConfig {
            ai_players: 0,
            ..Default::default()
        });
        run_until_ready(&mut server);
        drain(&mut transport);

        transport.deliver(Inbound::Connected {
            client: 7,
            name: "alice".to_string(),
        });
        server.update(1.0 / 60.0);

        let sent = drain(&mut transport);
        let first = &sent[0];
        assert_eq!(first.target, Target::Client(7));
        assert_eq!(
            first.message,
            Message::StartGame {
                level: "arena".to_string()
            }
        );

        let accepted = sent
            .iter()
            .position(|o| matches!(o.message, Message::JoinAccepted { .. }))
            .unwrap();
        let entered = sent
            .iter()
            .position(|o| matches!(o.message, Message::EnterEntity { .. }))
            .unwrap();
        assert!(accepted < entered);

        let player = server.world().players().by_client(7).unwrap();
        assert!(server.world().player(player).unwrap().entity.is_some());
    }

    #[test]
    fn disconnect_removes_the_player() {
        let (mut server, mut transport) = session(ServerConfig {
            ai_players: 0,
            ..Default::default()
        });
        run_until_ready(&mut server);

        transport.deliver(Inbound::Connected {
            client: 3,
            name: "bob".to_string(),
        });
        server.update(1.0 / 60.0);
        assert_eq!(server.world().players().len(), 1);

        transport.deliver(Inbound::Disconnected { client: 3 });
        server.update(1.0 / 60.0);
        assert!(server.world().players().is_empty());
    }

    #[test]
    fn chat_is_relayed_with_the_sender_name() {
        let (mut server, mut transport) = session(ServerConfig {
            level: None,
            ai_players: 0,
            ..Default::default()
        });
        transport.deliver(Inbound::Connected {
            client: 1,
            name: "carol".to_string(),
        });
        server.update(1.0 / 60.0);
        drain(&mut transport);

        transport.deliver(Inbound::Message {
            from: Peer::Client(1),
            message: Message::ChatText {
                text: "hello".to_string(),
            },
        });
        server.update(1.0 / 60.0);

        let sent = drain(&mut transport);
        assert!(sent.iter().any(|o| o.target == Target::AllClients
            && o.message
                == Message::ChatText {
                    text: "carol: hello".to_string()
                }));
    }

    #[test]
    fn relayed_chat_stays_within_the_line_limit() {
        let (mut server, mut transport) = session(ServerConfig {
            level: None,
            ai_players: 0,
            ..Default::default()
        });
        transport.deliver(Inbound::Connected {
            client: 1,
            name: "carol".to_string(),
        });
        server.update(1.0 / 60.0);
        drain(&mut transport);

        // Fits on its own, but not once the sender name is prefixed.
        transport.deliver(Inbound::Message {
            from: Peer::Client(1),
            message: Message::ChatText {
                text: "x".repeat(MAX_CHAT_CHARS),
            },
        });
        server.update(1.0 / 60.0);

        let relayed: Vec<String> = drain(&mut transport)
            .into_iter()
            .filter_map(|o| match o.message {
                Message::ChatText { text } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed[0].chars().count(), MAX_CHAT_CHARS);
        assert!(relayed[0].starts_with("carol: x"));
    }

    #[test]
    fn closing_removes_everything_and_tells_clients() {
        let (mut server, mut transport) = session(ServerConfig::default());
        run_until_ready(&mut server);
        drain(&mut transport);

        server.close_level();

        assert!(server.world().entities().is_empty());
        assert!(server.world().players().is_empty());
        assert_eq!(server.world().level_name(), None);
        let sent = drain(&mut transport);
        assert!(sent.iter().any(|o| o.message
            == Message::StartGame {
                level: String::new()
            }));
    }
}
