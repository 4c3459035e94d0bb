//! Authoritative or mirrored game state: entities, players and who drives what.
//!
//! A server `World` allocates ids, mutates first and broadcasts; a client
//! `World` only applies what the server sends, plus the input of its own
//! player. All mutation happens on the tick thread through [`World::update`]
//! and the session on top of it.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::{Quat, Vec3};

use crate::assets::{AssetError, AssetSource, ModelDesc};
use crate::config::{PlayerRemovalPolicy, WorldConfig};
use crate::control::{ControlAssignment, ControlInput, MotorTuning, policy_for};
use crate::effects::EffectsDispatcher;
use crate::level::{LevelData, LoadedLevel, NavMesh};
use crate::message::{Message, wire_quat};
use crate::net::NetLink;
use crate::notify::{Notification, Notifier};
use crate::physics::{BodyHandle, BodyKind, PhysicsSpace};
use crate::player::{AttributeValue, Player, PlayerDirectory};
use crate::registry::{EntityRecord, EntityRegistry};
use crate::sync::{Routed, SyncId, SyncManager};
use crate::types::{AiKind, ClientId, EntityId, GroupId, Peer, PlayerId, Role};

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error("only the server can {0}")]
    NotAuthoritative(&'static str),
    #[error("non-finite transform for '{0}'")]
    InvalidTransform(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    ClientConnected { client: ClientId, name: String },
    ClientDisconnected { client: ClientId },
    Chat { from: Peer, text: String },
    StartGame { from: Peer, level: String },
    JoinAccepted { player_id: PlayerId, group_id: GroupId },
}

#[derive(Debug)]
struct AttachedLevel {
    name: String,
    data: LevelData,
    navmesh: NavMesh,
    blocks: Vec<BodyHandle>,
}

pub struct World {
    role: Role,
    config: WorldConfig,
    tuning: MotorTuning,
    local_player: Option<PlayerId>,
    registry: EntityRegistry,
    players: PlayerDirectory,
    sync: SyncManager,
    physics: Box<dyn PhysicsSpace>,
    assets: Arc<dyn AssetSource>,
    models: BTreeMap<String, ModelDesc>,
    level: Option<AttachedLevel>,
    effects: EffectsDispatcher,
    notifier: Notifier,
}

fn finite(v: [f32; 3]) -> Option<Vec3> {
    let v = Vec3::from_array(v);
    v.is_finite().then_some(v)
}

impl World {
    pub fn new(
        role: Role,
        config: WorldConfig,
        physics: Box<dyn PhysicsSpace>,
        assets: Arc<dyn AssetSource>,
        link: NetLink,
        notifier: Notifier,
    ) -> Self {
        let mut sync = SyncManager::new(role, link, config.sync_rate);
        sync.add_object(SyncId::Effects, false);

        Self {
            role,
            tuning: MotorTuning::from(&config),
            config,
            local_player: None,
            registry: EntityRegistry::new(),
            players: PlayerDirectory::new(),
            sync,
            physics,
            assets,
            models: BTreeMap::new(),
            level: None,
            effects: EffectsDispatcher::new(notifier.clone()),
            notifier,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn local_player(&self) -> Option<PlayerId> {
        self.local_player
    }

    /// Client side: the player this process plays as. Re-evaluates the
    /// driver of whatever that player already controls.
    pub fn set_local_player(&mut self, player: Option<PlayerId>) {
        let previous = std::mem::replace(&mut self.local_player, player);
        for id in [previous, player].into_iter().flatten() {
            if let Some(entity) = self.players.get(id).and_then(|p| p.entity) {
                self.assign_control(entity);
            }
        }
    }

    pub fn players(&self) -> &PlayerDirectory {
        &self.players
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn is_human(&self, id: PlayerId) -> Option<bool> {
        self.players.is_human(id)
    }

    pub fn player_attribute(&self, id: PlayerId, key: &str) -> Option<&AttributeValue> {
        self.players.attribute(id, key)
    }

    pub fn set_player_attribute(&mut self, id: PlayerId, key: &str, value: AttributeValue) -> bool {
        self.players.set_attribute(id, key, value)
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityRecord> {
        self.registry.get(id)
    }

    pub fn find_entity_id(&self, body: BodyHandle) -> Option<EntityId> {
        self.registry.find_entity_id(body)
    }

    pub fn entity_position(&self, id: EntityId) -> Option<Vec3> {
        self.physics.position(self.registry.get(id)?.body)
    }

    pub fn physics(&self) -> &dyn PhysicsSpace {
        self.physics.as_ref()
    }

    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    pub fn effects(&self) -> &EffectsDispatcher {
        &self.effects
    }

    pub fn level_name(&self) -> Option<&str> {
        self.level.as_ref().map(|l| l.name.as_str())
    }

    pub fn level_data(&self) -> Option<&LevelData> {
        self.level.as_ref().map(|l| &l.data)
    }

    pub fn navmesh(&self) -> Option<&NavMesh> {
        self.level.as_ref().map(|l| &l.navmesh)
    }

    pub fn broadcast(&self, message: Message) {
        self.sync.broadcast(message);
    }

    pub fn send_to(&self, client: ClientId, message: Message) {
        self.sync.send_to(client, message);
    }

    // Entities

    pub fn add_entity(
        &mut self,
        model: &str,
        position: Vec3,
        rotation: Quat,
    ) -> Result<EntityId, WorldError> {
        if !self.role.is_authoritative() {
            return Err(WorldError::NotAuthoritative("allocate entity ids"));
        }
        let id = self.registry.allocate_id();
        self.spawn(id, model, position, rotation)?;
        self.sync
            .broadcast(Message::add_entity(id, model, position, rotation));
        Ok(id)
    }

    pub fn apply_add_entity(
        &mut self,
        id: EntityId,
        model: &str,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), WorldError> {
        if self.registry.contains(id) {
            log::warn!("Entity {} already exists, replacing it", id);
            self.despawn(id);
        }
        self.spawn(id, model, position, rotation)
    }

    fn spawn(
        &mut self,
        id: EntityId,
        model: &str,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), WorldError> {
        if !position.is_finite() || !rotation.is_finite() {
            return Err(WorldError::InvalidTransform(model.to_string()));
        }
        let desc = self.model_desc(model)?;
        let body = self.physics.add_body(&desc.body(), position, rotation);
        self.registry
            .insert(EntityRecord::new(id, model, desc.kind, body));
        self.sync
            .add_object(SyncId::Entity(id), desc.kind.is_replicated());

        log::debug!("Added {:?} entity {} ({}) at {}", desc.kind, id, model, position);
        Ok(())
    }

    fn model_desc(&mut self, model: &str) -> Result<ModelDesc, AssetError> {
        if let Some(desc) = self.models.get(model) {
            return Ok(*desc);
        }
        let desc = self.assets.load_model(model)?;
        self.models.insert(model.to_string(), desc);
        Ok(desc)
    }

    pub fn remove_entity(&mut self, id: EntityId) -> bool {
        if !self.registry.contains(id) {
            log::warn!("Cannot remove unknown entity {}", id);
            return false;
        }
        if self.role.is_authoritative() {
            self.sync.broadcast(Message::RemoveEntity { entity_id: id });
        }
        self.despawn(id);
        true
    }

    fn despawn(&mut self, id: EntityId) {
        self.sync.remove_object(SyncId::Entity(id));

        let Some(record) = self.registry.get_mut(id) else {
            return;
        };
        record.control.detach(self.physics.as_mut(), record.body);
        let body = record.body;
        let controller = record.player_id;

        if let Some(player) = controller.and_then(|p| self.players.get_mut(p)) {
            if player.entity == Some(id) {
                player.entity = None;
                self.notifier.notify(Notification::ControlledEntityChanged {
                    player_id: player.id,
                    entity_id: None,
                });
            }
        }

        self.physics.remove_body(body);
        self.registry.remove(id);
        log::debug!("Removed entity {}", id);
    }

    // Players

    pub fn add_player(
        &mut self,
        name: &str,
        group: GroupId,
        ai: Option<AiKind>,
        client: Option<ClientId>,
    ) -> Result<PlayerId, WorldError> {
        if !self.role.is_authoritative() {
            return Err(WorldError::NotAuthoritative("allocate player ids"));
        }
        let id = self.players.allocate_id();
        let mut player = Player::new(id, name, group, ai);
        if let Some(client) = client {
            player = player.with_client(client);
        }
        self.players.insert(player);

        self.sync.broadcast(Message::AddPlayer {
            player_id: id,
            name: name.to_string(),
            group_id: group,
            ai_kind: AiKind::to_wire(ai),
        });
        log::info!("Player {} '{}' joined (group {}, ai {:?})", id, name, group, ai);
        self.notify_players();
        Ok(id)
    }

    pub fn apply_add_player(&mut self, id: PlayerId, name: &str, group: GroupId, ai: Option<AiKind>) {
        if self.players.contains(id) {
            log::warn!("Player {} already exists, replacing it", id);
            self.enter_entity(id, None);
        }
        self.players.insert(Player::new(id, name, group, ai));
        log::info!("Player {} '{}' joined", id, name);
        self.notify_players();
    }

    /// Removes a player, releasing what it controls first. On the server the
    /// removal policy decides whether that entity goes too.
    pub fn remove_player(&mut self, id: PlayerId) -> bool {
        let Some(entity) = self.players.get(id).map(|p| p.entity) else {
            log::warn!("Cannot remove unknown player {}", id);
            return false;
        };

        self.enter_entity(id, None);

        if self.role.is_authoritative() {
            if self.config.removal_policy == PlayerRemovalPolicy::DespawnControlled {
                if let Some(entity) = entity {
                    self.remove_entity(entity);
                }
            }
            self.sync.broadcast(Message::RemovePlayer { player_id: id });
        }

        if let Some(player) = self.players.remove(id) {
            log::info!("Player {} '{}' left", id, player.name);
        }
        if self.local_player == Some(id) {
            self.local_player = None;
        }
        self.notify_players();
        true
    }

    fn notify_players(&self) {
        self.notifier.notify(Notification::PlayerListChanged {
            players: self.players.summaries(),
        });
    }

    // Control

    /// Moves `player` into `target`, or out of whatever it controls when
    /// `target` is `None`. Returns whether anything changed.
    pub fn enter_entity(&mut self, player_id: PlayerId, target: Option<EntityId>) -> bool {
        let Some(current) = self.players.get(player_id).map(|p| p.entity) else {
            log::warn!("Unknown player {} cannot enter entity {:?}", player_id, target);
            return false;
        };
        if let Some(target) = target {
            if !self.registry.contains(target) {
                log::warn!("Player {} cannot enter unknown entity {}", player_id, target);
                return false;
            }
        }
        if current == target {
            return false;
        }

        if let Some(target) = target {
            let occupant = self.registry.get(target).and_then(|r| r.player_id);
            if let Some(other) = occupant.filter(|&other| other != player_id) {
                log::info!("Player {} takes entity {} from player {}", player_id, target, other);
                self.enter_entity(other, None);
            }
        }

        if let Some(old) = current {
            self.release(old);
        }
        if let Some(player) = self.players.get_mut(player_id) {
            player.entity = target;
        }

        if self.role.is_authoritative() {
            self.sync.broadcast(Message::EnterEntity {
                player_id,
                entity_id: target,
            });
        }

        if let Some(target) = target {
            let group = self.players.get(player_id).map(|p| p.group);
            if let Some(record) = self.registry.get_mut(target) {
                record.player_id = Some(player_id);
                record.group_id = group;
            }
            self.assign_control(target);
        }

        log::debug!("Player {} now controls {:?}", player_id, target);
        self.notifier.notify(Notification::ControlledEntityChanged {
            player_id,
            entity_id: target,
        });
        self.notify_players();
        true
    }

    fn release(&mut self, entity: EntityId) {
        if let Some(record) = self.registry.get_mut(entity) {
            record.control.detach(self.physics.as_mut(), record.body);
            record.player_id = None;
            record.group_id = None;
        }
    }

    fn assign_control(&mut self, entity: EntityId) {
        let Some(record) = self.registry.get_mut(entity) else {
            return;
        };
        let Some(player) = record.player_id.and_then(|p| self.players.get(p)) else {
            record.control.detach(self.physics.as_mut(), record.body);
            return;
        };

        let is_human = player.is_human();
        let is_local = match self.role {
            Role::Server => !is_human,
            Role::Client => self.local_player == Some(player.id),
        };
        let owner = player.client.map_or(Peer::Server, Peer::Client);
        let assignment = ControlAssignment::choose(self.role, is_human, is_local, owner);

        let policy = (assignment == ControlAssignment::AutonomousLocal).then(|| {
            policy_for(
                player.ai.unwrap_or(AiKind::Default),
                self.config.ai_seed.wrapping_add(entity as u64),
            )
        });

        let changed = record.control.attach(
            assignment,
            record.kind,
            self.physics.as_mut(),
            record.body,
            &self.tuning,
            policy,
        );
        if changed {
            log::debug!("Entity {} driven by {:?}", entity, assignment);
            self.sync.reset_input(SyncId::Entity(entity));
        }
    }

    pub fn local_entity(&self) -> Option<EntityId> {
        self.players.get(self.local_player?)?.entity
    }

    pub fn set_local_input(&mut self, input: ControlInput) -> bool {
        let Some(entity) = self.local_entity() else {
            return false;
        };
        match self.registry.get_mut(entity) {
            Some(record) if record.control.assignment() == ControlAssignment::ManualLocal => {
                record.control.set_input(input);
                true
            }
            _ => false,
        }
    }

    // Tick

    /// Applies up to `max_messages_per_tick` inbound messages, runs the
    /// drivers, steps physics and replicates. Returns what the session has
    /// to handle.
    pub fn update(&mut self, dt: f32) -> Vec<WorldEvent> {
        let mut events = Vec::new();
        for _ in 0..self.config.max_messages_per_tick {
            let Some(routed) = self.sync.next_inbound() else {
                break;
            };
            events.extend(self.apply(routed));
        }

        let navmesh = self.level.as_ref().map(|l| &l.navmesh);
        for record in self.registry.iter_mut() {
            record
                .control
                .tick(self.physics.as_mut(), record.body, dt, navmesh);
        }
        self.physics.step();

        if self.sync.replication_due(dt) {
            match self.role {
                Role::Server => self.replicate(),
                Role::Client => self.send_local_input(),
            }
        }

        events
    }

    pub fn apply(&mut self, routed: Routed) -> Option<WorldEvent> {
        match routed {
            Routed::Connected { client, name } => Some(WorldEvent::ClientConnected { client, name }),
            Routed::Disconnected { client } => Some(WorldEvent::ClientDisconnected { client }),
            Routed::Effects { message } => {
                self.effects.apply(&message);
                None
            }
            Routed::Entity { id, from, message } => {
                self.apply_entity_message(id, from, message);
                None
            }
            Routed::World { from, message } => self.apply_world_message(from, message),
        }
    }

    fn apply_world_message(&mut self, from: Peer, message: Message) -> Option<WorldEvent> {
        match message {
            Message::AddPlayer {
                player_id,
                name,
                group_id,
                ai_kind,
            } => self.apply_add_player(player_id, &name, group_id, AiKind::from_wire(ai_kind)),
            Message::RemovePlayer { player_id } => {
                self.remove_player(player_id);
            }
            Message::AddEntity {
                entity_id,
                model,
                position,
                rotation,
            } => {
                let result = self.apply_add_entity(
                    entity_id,
                    &model,
                    Vec3::from_array(position),
                    wire_quat(rotation),
                );
                if let Err(e) = result {
                    log::error!("Failed to add entity {} ({}): {}", entity_id, model, e);
                }
            }
            Message::RemoveEntity { entity_id } => {
                self.remove_entity(entity_id);
            }
            Message::EnterEntity {
                player_id,
                entity_id,
            } => {
                self.enter_entity(player_id, entity_id);
            }
            Message::ChatText { text } => return Some(WorldEvent::Chat { from, text }),
            Message::StartGame { level } => return Some(WorldEvent::StartGame { from, level }),
            Message::JoinAccepted {
                player_id,
                group_id,
            } => {
                return Some(WorldEvent::JoinAccepted {
                    player_id,
                    group_id,
                });
            }
            other => log::warn!("Unexpected {:?} addressed to the world", other.kind()),
        }
        None
    }

    fn apply_entity_message(&mut self, id: EntityId, from: Peer, message: Message) {
        let Some(record) = self.registry.get_mut(id) else {
            return;
        };
        let body = record.body;

        match message {
            Message::SyncRigidBody {
                position,
                rotation,
                linear_velocity,
                angular_velocity,
                ..
            } => {
                let (Some(position), Some(linear), Some(angular)) =
                    (finite(position), finite(linear_velocity), finite(angular_velocity))
                else {
                    log::warn!("Ignoring non-finite sample for entity {}", id);
                    return;
                };
                self.physics.set_position(body, position);
                self.physics.set_rotation(body, wire_quat(rotation));
                self.physics.set_linear_velocity(body, linear);
                self.physics.set_angular_velocity(body, angular);
            }
            Message::SyncCharacter {
                position,
                rotation,
                walk_direction,
                ..
            } => {
                let (Some(position), Some(walk)) = (finite(position), finite(walk_direction)) else {
                    log::warn!("Ignoring non-finite sample for entity {}", id);
                    return;
                };
                self.physics.set_position(body, position);
                self.physics.set_rotation(body, wire_quat(rotation));
                if record.control.assignment() != ControlAssignment::ManualLocal {
                    self.physics.set_walk_direction(body, walk);
                }
            }
            Message::ManualControlInput { movement, look, .. } => {
                if record.control.assignment() == ControlAssignment::ManualRemote(from) {
                    record.control.set_input(ControlInput::from_wire(movement, look));
                } else {
                    log::warn!("Ignoring input for entity {} from {:?}, which does not drive it", id, from);
                }
            }
            other => log::warn!("Unexpected {:?} addressed to entity {}", other.kind(), id),
        }
    }

    fn replicate(&mut self) {
        let sample = self.sync.next_sample();
        for id in self.sync.replicated_entities() {
            let Some(record) = self.registry.get(id) else {
                continue;
            };
            if let Some(message) = self.sample_message(record, sample) {
                self.sync.broadcast(message);
            }
        }
    }

    fn sample_message(&self, record: &EntityRecord, sample: u32) -> Option<Message> {
        let physics = self.physics.as_ref();
        let position = physics.position(record.body)?.to_array();
        let rotation = physics.rotation(record.body)?.to_array();

        match record.kind {
            BodyKind::Character => Some(Message::SyncCharacter {
                entity_id: record.id,
                position,
                rotation,
                walk_direction: physics
                    .walk_direction(record.body)
                    .unwrap_or(Vec3::ZERO)
                    .to_array(),
                sample,
            }),
            BodyKind::Vehicle | BodyKind::Rigid => Some(Message::SyncRigidBody {
                entity_id: record.id,
                position,
                rotation,
                linear_velocity: physics
                    .linear_velocity(record.body)
                    .unwrap_or(Vec3::ZERO)
                    .to_array(),
                angular_velocity: physics
                    .angular_velocity(record.body)
                    .unwrap_or(Vec3::ZERO)
                    .to_array(),
                sample,
            }),
            BodyKind::Static => None,
        }
    }

    fn send_local_input(&mut self) {
        let Some(entity) = self.local_entity() else {
            return;
        };
        let input = match self.registry.get(entity) {
            Some(record) if record.control.assignment() == ControlAssignment::ManualLocal => {
                record.control.input()
            }
            _ => return,
        };

        let sample = self.sync.next_sample();
        self.sync.broadcast(Message::ManualControlInput {
            entity_id: entity,
            movement: input.movement.to_array(),
            look: input.look.to_array(),
            sample,
        });
    }

    // Levels

    pub fn attach_level(&mut self, level: LoadedLevel) {
        if let Some(previous) = self.level.take() {
            self.remove_level_geometry(previous);
        }

        self.models.extend(level.models);
        let blocks = level
            .data
            .blocks
            .iter()
            .map(|block| {
                self.physics.add_static_block(
                    Vec3::from_array(block.position),
                    Vec3::from_array(block.half_extents),
                )
            })
            .collect();

        log::info!("Attached level '{}'", level.name);
        self.notifier.status(format!("Level '{}' ready", level.name));
        self.level = Some(AttachedLevel {
            name: level.name,
            data: level.data,
            navmesh: level.navmesh,
            blocks,
        });
    }

    pub fn close_level(&mut self) {
        if self.role.is_authoritative() {
            self.sync.broadcast(Message::StartGame {
                level: String::new(),
            });
        }

        for id in self.registry.ids() {
            self.despawn(id);
        }
        if let Some(level) = self.level.take() {
            log::info!("Closed level '{}'", level.name);
            self.remove_level_geometry(level);
        }
        self.notifier.status("Level closed");
        self.notify_players();
    }

    fn remove_level_geometry(&mut self, level: AttachedLevel) {
        for block in level.blocks {
            self.physics.remove_body(block);
        }
    }

    /// Everything a late joiner needs to mirror this world: the level,
    /// players, entities, then who controls what.
    pub fn catch_up_messages(&self) -> Vec<Message> {
        let mut messages = Vec::new();

        if let Some(level) = &self.level {
            messages.push(Message::StartGame {
                level: level.name.clone(),
            });
        }

        for player in self.players.iter() {
            messages.push(Message::AddPlayer {
                player_id: player.id,
                name: player.name.clone(),
                group_id: player.group,
                ai_kind: AiKind::to_wire(player.ai),
            });
        }

        for record in self.registry.iter() {
            let position = self.physics.position(record.body).unwrap_or(Vec3::ZERO);
            let rotation = self.physics.rotation(record.body).unwrap_or(Quat::IDENTITY);
            messages.push(Message::add_entity(record.id, &record.model, position, rotation));
        }

        for player in self.players.iter() {
            if let Some(entity) = player.entity {
                messages.push(Message::EnterEntity {
                    player_id: player.id,
                    entity_id: Some(entity),
                });
            }
        }

        messages
    }

    pub fn play_effect(&mut self, effect: &str, position: Vec3, rotation: Quat) {
        if self.role.is_authoritative() {
            self.sync
                .broadcast(Message::play_effect(effect, position, rotation));
        }
        self.effects.play(effect, position, rotation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetCatalog;
    use crate::net::{Inbound, Outbound, Target, TransportLink, link};
    use crate::physics::RapierSpace;

    fn world(role: Role, config: WorldConfig) -> (World, TransportLink) {
        let (net, transport) = link();
        let world = World::new(
            role,
            config.clone(),
            Box::new(RapierSpace::new(config.dt())),
            Arc::new(AssetCatalog::builtin()),
            net,
            Notifier::disabled(),
        );
        (world, transport)
    }

    fn server() -> (World, TransportLink) {
        world(Role::Server, WorldConfig::default())
    }

    fn drain(transport: &mut TransportLink) -> Vec<Outbound> {
        std::iter::from_fn(|| transport.try_next_outbound()).collect()
    }

    fn soldier(world: &mut World) -> EntityId {
        world
            .add_entity("soldier.model", Vec3::new(0.0, 1.0, 0.0), Quat::IDENTITY)
            .unwrap()
    }

    #[test]
    fn entity_ids_fill_the_smallest_gap() {
        let (mut world, _t) = server();
        let ids: Vec<_> = (0..3).map(|_| soldier(&mut world)).collect();
        assert_eq!(ids, vec![0, 1, 2]);

        assert!(world.remove_entity(1));
        assert_eq!(soldier(&mut world), 1);
        assert_eq!(soldier(&mut world), 3);
    }

    #[test]
    fn freed_ids_are_reused_lowest_first() {
        let (mut world, _t) = server();
        let ids: Vec<_> = (0..50).map(|_| soldier(&mut world)).collect();
        assert_eq!(ids, (0..50).collect::<Vec<_>>());

        assert!(world.remove_entity(25));
        assert!(world.remove_entity(10));
        assert_eq!(soldier(&mut world), 10);
        assert_eq!(soldier(&mut world), 25);
        assert_eq!(soldier(&mut world), 50);
        assert_eq!(world.entities().len(), 51);
    }

    #[test]
    fn removing_unknown_entities_changes_nothing() {
        let (mut world, mut transport) = server();
        let id = soldier(&mut world);
        drain(&mut transport);

        assert!(world.remove_entity(id));
        assert!(!world.remove_entity(id));
        assert!(!world.remove_entity(42));

        let sent = drain(&mut transport);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message, Message::RemoveEntity { entity_id: id });
        assert!(world.entities().is_empty());
        assert_eq!(world.physics().body_count(), 0);
    }

    #[test]
    fn unknown_models_fail_without_broadcast() {
        let (mut world, mut transport) = server();
        let result = world.add_entity("ghost.model", Vec3::ZERO, Quat::IDENTITY);
        assert!(matches!(result, Err(WorldError::Asset(_))));
        assert!(drain(&mut transport).is_empty());
        assert!(world.entities().is_empty());
    }

    #[test]
    fn entering_is_exclusive_and_idempotent() {
        let (mut world, mut transport) = server();
        let a = world.add_player("a", 1, Some(AiKind::Default), None).unwrap();
        let b = world.add_player("b", 1, Some(AiKind::Default), None).unwrap();
        let e = soldier(&mut world);
        drain(&mut transport);

        assert!(world.enter_entity(a, Some(e)));
        assert!(!world.enter_entity(a, Some(e)));
        assert_eq!(
            world.entity(e).unwrap().control.assignment(),
            ControlAssignment::AutonomousLocal
        );

        assert!(world.enter_entity(b, Some(e)));
        assert_eq!(world.player(a).unwrap().entity, None);
        assert_eq!(world.player(b).unwrap().entity, Some(e));
        assert_eq!(world.entity(e).unwrap().player_id, Some(b));

        let sent: Vec<Message> = drain(&mut transport).into_iter().map(|o| o.message).collect();
        assert_eq!(
            sent,
            vec![
                Message::EnterEntity {
                    player_id: a,
                    entity_id: Some(e)
                },
                Message::EnterEntity {
                    player_id: a,
                    entity_id: None
                },
                Message::EnterEntity {
                    player_id: b,
                    entity_id: Some(e)
                },
            ]
        );
    }

    #[test]
    fn entering_unknown_things_is_a_no_op() {
        let (mut world, _t) = server();
        let e = soldier(&mut world);
        let p = world.add_player("p", 0, None, Some(1)).unwrap();

        assert!(!world.enter_entity(99, Some(e)));
        assert!(!world.enter_entity(p, Some(99)));
        assert!(world.entity(e).unwrap().player_id.is_none());
    }

    #[test]
    fn switching_entities_detaches_first() {
        let (mut world, _t) = server();
        let p = world.add_player("p", 0, None, Some(3)).unwrap();
        let first = soldier(&mut world);
        let second = soldier(&mut world);

        world.enter_entity(p, Some(first));
        assert_eq!(
            world.entity(first).unwrap().control.assignment(),
            ControlAssignment::ManualRemote(Peer::Client(3))
        );

        world.enter_entity(p, Some(second));
        let old = world.entity(first).unwrap();
        assert_eq!(old.control.assignment(), ControlAssignment::Unassigned);
        assert!(old.player_id.is_none());
        assert!(old.group_id.is_none());
        assert_eq!(world.entity(second).unwrap().player_id, Some(p));
    }

    #[test]
    fn removal_policy_decides_entity_fate() {
        let (mut kept, _t1) = server();
        let p = kept.add_player("p", 0, None, Some(1)).unwrap();
        let e = soldier(&mut kept);
        kept.enter_entity(p, Some(e));
        assert!(kept.remove_player(p));
        assert!(kept.entity(e).is_some());
        assert!(kept.entity(e).unwrap().player_id.is_none());
        assert!(!kept.remove_player(p));

        let config = WorldConfig {
            removal_policy: PlayerRemovalPolicy::DespawnControlled,
            ..WorldConfig::default()
        };
        let (mut despawning, mut transport) = world(Role::Server, config);
        let p = despawning.add_player("p", 0, None, Some(1)).unwrap();
        let e = soldier(&mut despawning);
        despawning.enter_entity(p, Some(e));
        drain(&mut transport);

        assert!(despawning.remove_player(p));
        assert!(despawning.entity(e).is_none());
        let sent: Vec<Message> = drain(&mut transport).into_iter().map(|o| o.message).collect();
        assert_eq!(
            sent,
            vec![
                Message::EnterEntity {
                    player_id: p,
                    entity_id: None
                },
                Message::RemoveEntity { entity_id: e },
                Message::RemovePlayer { player_id: p },
            ]
        );
    }

    #[test]
    fn input_only_from_the_driving_client() {
        let (mut world, transport) = server();
        let p = world.add_player("p", 0, None, Some(7)).unwrap();
        let e = soldier(&mut world);
        world.enter_entity(p, Some(e));

        let input = |sample| Message::ManualControlInput {
            entity_id: e,
            movement: [0.0, 0.0, 1.0],
            look: [0.0, 0.0, 1.0],
            sample,
        };
        transport.deliver(Inbound::Message {
            from: Peer::Client(8),
            message: input(1),
        });
        world.update(1.0 / 60.0);
        assert_eq!(world.entity(e).unwrap().control.input(), ControlInput::default());

        transport.deliver(Inbound::Message {
            from: Peer::Client(7),
            message: input(2),
        });
        world.update(1.0 / 60.0);
        assert_eq!(world.entity(e).unwrap().control.input().movement, Vec3::Z);
    }

    #[test]
    fn inbound_drain_is_bounded() {
        let config = WorldConfig {
            max_messages_per_tick: 2,
            ..WorldConfig::default()
        };
        let (mut world, transport) = world(Role::Server, config);
        for i in 0..5 {
            transport.deliver(Inbound::Message {
                from: Peer::Client(1),
                message: Message::ChatText {
                    text: format!("{i}"),
                },
            });
        }
        assert_eq!(world.update(0.0).len(), 2);
        assert_eq!(world.update(0.0).len(), 2);
        assert_eq!(world.update(0.0).len(), 1);
    }

    #[test]
    fn server_replicates_at_the_sync_rate() {
        let (mut world, mut transport) = server();
        soldier(&mut world);
        world
            .add_entity("house.model", Vec3::ZERO, Quat::IDENTITY)
            .unwrap();
        world
            .add_entity("crate.model", Vec3::new(3.0, 1.0, 0.0), Quat::IDENTITY)
            .unwrap();
        drain(&mut transport);

        // One second at 60 Hz with a 20 Hz sync rate.
        for _ in 0..60 {
            world.update(1.0 / 60.0);
        }
        let sent = drain(&mut transport);
        let characters = sent
            .iter()
            .filter(|o| matches!(o.message, Message::SyncCharacter { .. }))
            .count();
        let rigid = sent
            .iter()
            .filter(|o| matches!(o.message, Message::SyncRigidBody { .. }))
            .count();
        assert!((19..=21).contains(&characters), "{characters} samples");
        assert_eq!(characters, rigid);
        assert!(sent.iter().all(|o| o.target == Target::AllClients));
    }

    #[test]
    fn client_applies_and_mirrors() {
        let (mut client, transport) = world(Role::Client, WorldConfig::default());
        let messages = vec![
            Message::AddPlayer {
                player_id: 1,
                name: "me".to_string(),
                group_id: 0,
                ai_kind: None,
            },
            Message::add_entity(4, "soldier.model", Vec3::new(0.0, 1.0, 0.0), Quat::IDENTITY),
            Message::JoinAccepted {
                player_id: 1,
                group_id: 0,
            },
        ];
        for message in messages {
            transport.deliver(Inbound::Message {
                from: Peer::Server,
                message,
            });
        }
        let events = client.update(1.0 / 60.0);
        assert_eq!(
            events,
            vec![WorldEvent::JoinAccepted {
                player_id: 1,
                group_id: 0
            }]
        );
        client.set_local_player(Some(1));

        transport.deliver(Inbound::Message {
            from: Peer::Server,
            message: Message::EnterEntity {
                player_id: 1,
                entity_id: Some(4),
            },
        });
        client.update(1.0 / 60.0);
        assert_eq!(
            client.entity(4).unwrap().control.assignment(),
            ControlAssignment::ManualLocal
        );
        assert!(client.set_local_input(ControlInput {
            movement: Vec3::X,
            look: Vec3::X,
        }));

        // Clients never allocate.
        assert!(matches!(
            client.add_entity("crate.model", Vec3::ZERO, Quat::IDENTITY),
            Err(WorldError::NotAuthoritative(_))
        ));
    }

    #[test]
    fn client_add_then_remove_in_one_batch() {
        let (mut client, transport) = world(Role::Client, WorldConfig::default());
        for message in [
            Message::add_entity(9, "crate.model", Vec3::new(0.0, 2.0, 0.0), Quat::IDENTITY),
            Message::RemoveEntity { entity_id: 9 },
        ] {
            transport.deliver(Inbound::Message {
                from: Peer::Server,
                message,
            });
        }

        client.update(1.0 / 60.0);

        assert!(client.entities().is_empty());
        assert!(!client.sync().contains(SyncId::Entity(9)));
        assert_eq!(client.physics().body_count(), 0);
    }

    #[test]
    fn client_keeps_the_newest_character_sample() {
        let (mut client, transport) = world(Role::Client, WorldConfig::default());
        let sample = |sample, x| Message::SyncCharacter {
            entity_id: 4,
            position: [x, 1.0, 0.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
            walk_direction: [0.0; 3],
            sample,
        };
        for message in [
            Message::add_entity(4, "soldier.model", Vec3::new(0.0, 1.0, 0.0), Quat::IDENTITY),
            sample(5, 10.0),
            sample(4, -10.0),
        ] {
            transport.deliver(Inbound::Message {
                from: Peer::Server,
                message,
            });
        }
        client.update(1.0 / 60.0);
        let x = client.entity_position(4).unwrap().x;
        assert!((x - 10.0).abs() < 0.5, "x = {x}");

        // A late sample on a later tick is ignored too.
        transport.deliver(Inbound::Message {
            from: Peer::Server,
            message: sample(3, -20.0),
        });
        client.update(1.0 / 60.0);
        let x = client.entity_position(4).unwrap().x;
        assert!((x - 10.0).abs() < 0.5, "x = {x}");
    }

    #[test]
    fn catch_up_orders_players_before_control() {
        let (mut world, _t) = server();
        let p = world.add_player("p", 0, None, Some(1)).unwrap();
        let e = soldier(&mut world);
        world.enter_entity(p, Some(e));

        let kinds: Vec<_> = world.catch_up_messages().iter().map(Message::kind).collect();
        use crate::message::MessageKind::*;
        assert_eq!(kinds, vec![AddPlayer, AddEntity, EnterEntity]);
    }
}
