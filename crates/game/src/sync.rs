//! The single choke point for replicated traffic.
//!
//! Inbound messages are drained from the [`NetLink`], filtered by what this
//! role accepts and routed by the id they carry. Outbound messages go back
//! through the same link in production order.

use std::collections::BTreeMap;

use crate::clock::ReplicationClock;
use crate::message::{Message, MessageKinds};
use crate::net::{Inbound, NetLink, Outbound, Target, sequence_greater_than};
use crate::types::{ClientId, EntityId, Peer, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncId {
    /// The world manager. Wire value -1.
    World,
    /// The effects dispatcher. Wire value -2.
    Effects,
    Entity(EntityId),
}

impl SyncId {
    pub fn to_wire(self) -> i64 {
        match self {
            Self::World => -1,
            Self::Effects => -2,
            Self::Entity(id) => id as i64,
        }
    }

    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            -1 => Some(Self::World),
            -2 => Some(Self::Effects),
            id => EntityId::try_from(id).ok().map(Self::Entity),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SyncEntry {
    replicated: bool,
    last_sample: Option<u32>,
    last_input: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Connected { client: ClientId, name: String },
    Disconnected { client: ClientId },
    World { from: Peer, message: Message },
    Effects { message: Message },
    Entity { id: EntityId, from: Peer, message: Message },
}

pub struct SyncManager {
    role: Role,
    accepted: MessageKinds,
    link: NetLink,
    objects: BTreeMap<SyncId, SyncEntry>,
    clock: ReplicationClock,
    next_sample: u32,
}

impl SyncManager {
    pub fn new(role: Role, link: NetLink, sync_rate: u32) -> Self {
        let accepted = match role {
            Role::Server => MessageKinds::SERVER_INBOUND,
            Role::Client => MessageKinds::CLIENT_INBOUND,
        };
        let mut objects = BTreeMap::new();
        objects.insert(SyncId::World, SyncEntry::default());

        Self {
            role,
            accepted,
            link,
            objects,
            clock: ReplicationClock::new(sync_rate),
            next_sample: 1,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Registers an object. Returns `false` if it was already registered,
    /// in which case its sample history is kept.
    pub fn add_object(&mut self, id: SyncId, replicated: bool) -> bool {
        if self.objects.contains_key(&id) {
            return false;
        }
        self.objects.insert(
            id,
            SyncEntry {
                replicated,
                ..SyncEntry::default()
            },
        );
        true
    }

    pub fn remove_object(&mut self, id: SyncId) -> bool {
        self.objects.remove(&id).is_some()
    }

    pub fn contains(&self, id: SyncId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn reset_input(&mut self, id: SyncId) {
        if let Some(entry) = self.objects.get_mut(&id) {
            entry.last_input = None;
        }
    }

    pub fn replicated_entities(&self) -> Vec<EntityId> {
        self.objects
            .iter()
            .filter_map(|(id, entry)| match id {
                SyncId::Entity(entity) if entry.replicated => Some(*entity),
                _ => None,
            })
            .collect()
    }

    pub fn replication_due(&mut self, dt: f32) -> bool {
        self.clock.advance(dt)
    }

    /// A fresh generation stamp. Never returns 0.
    pub fn next_sample(&mut self) -> u32 {
        let sample = self.next_sample;
        self.next_sample = match self.next_sample.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        sample
    }

    pub fn next_inbound(&mut self) -> Option<Routed> {
        loop {
            let routed = match self.link.try_recv()? {
                Inbound::Connected { client, name } => Some(Routed::Connected { client, name }),
                Inbound::Disconnected { client } => Some(Routed::Disconnected { client }),
                Inbound::Message { from, message } => self.route(from, message),
            };
            if routed.is_some() {
                return routed;
            }
        }
    }

    pub fn route(&mut self, from: Peer, message: Message) -> Option<Routed> {
        let kind = message.kind();
        if !self.accepted.accepts(kind) {
            log::warn!("Dropping {:?} from {:?}: not accepted by the {:?}", kind, from, self.role);
            return None;
        }

        match message.sync_id() {
            SyncId::World => Some(Routed::World { from, message }),
            SyncId::Effects => Some(Routed::Effects { message }),
            SyncId::Entity(id) => {
                let Some(entry) = self.objects.get_mut(&SyncId::Entity(id)) else {
                    log::warn!("Dropping {:?} for unknown entity {}", kind, id);
                    return None;
                };

                if let Some(sample) = message.sample() {
                    let last = match &message {
                        Message::ManualControlInput { .. } => &mut entry.last_input,
                        _ => &mut entry.last_sample,
                    };
                    if let Some(previous) = *last {
                        if !sequence_greater_than(sample, previous) {
                            log::debug!(
                                "Dropping stale {:?} for entity {} ({} <= {})",
                                kind,
                                id,
                                sample,
                                previous
                            );
                            return None;
                        }
                    }
                    *last = Some(sample);
                }

                Some(Routed::Entity { id, from, message })
            }
        }
    }

    /// Server: to every client. Client: to the server.
    pub fn broadcast(&self, message: Message) {
        let target = match self.role {
            Role::Server => Target::AllClients,
            Role::Client => Target::Server,
        };
        self.send(target, message);
    }

    pub fn send_to(&self, client: ClientId, message: Message) {
        self.send(Target::Client(client), message);
    }

    pub fn broadcast_except(&self, client: ClientId, message: Message) {
        self.send(Target::AllClientsExcept(client), message);
    }

    fn send(&self, target: Target, message: Message) {
        if self.role == Role::Client && target != Target::Server {
            log::warn!("Client cannot address {:?}, dropping {:?}", target, message.kind());
            return;
        }
        if !self.link.send(Outbound { target, message }) {
            log::debug!("Network link closed, message to {:?} dropped", target);
        }
    }

    pub fn is_linked(&self) -> bool {
        self.link.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{TransportLink, link};

    fn manager(role: Role) -> (SyncManager, TransportLink) {
        let (net, transport) = link();
        (SyncManager::new(role, net, 20), transport)
    }

    fn character_sample(entity_id: EntityId, sample: u32) -> Message {
        Message::SyncCharacter {
            entity_id,
            position: [sample as f32, 0.0, 0.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
            walk_direction: [0.0; 3],
            sample,
        }
    }

    #[test]
    fn wire_ids() {
        assert_eq!(SyncId::World.to_wire(), -1);
        assert_eq!(SyncId::Effects.to_wire(), -2);
        assert_eq!(SyncId::from_wire(-2), Some(SyncId::Effects));
        assert_eq!(SyncId::from_wire(12), Some(SyncId::Entity(12)));
        assert_eq!(SyncId::from_wire(-7), None);
    }

    #[test]
    fn add_and_remove_are_idempotent() {
        let (mut sync, _t) = manager(Role::Client);
        assert!(sync.add_object(SyncId::Entity(3), true));
        assert!(!sync.add_object(SyncId::Entity(3), true));
        assert_eq!(sync.replicated_entities(), vec![3]);

        assert!(sync.remove_object(SyncId::Entity(3)));
        assert!(!sync.remove_object(SyncId::Entity(3)));
        assert!(!sync.remove_object(SyncId::Entity(99)));
        assert!(sync.replicated_entities().is_empty());
    }

    #[test]
    fn stale_samples_are_dropped() {
        let (mut sync, _t) = manager(Role::Client);
        sync.add_object(SyncId::Entity(1), true);

        assert!(sync.route(Peer::Server, character_sample(1, 5)).is_some());
        assert!(sync.route(Peer::Server, character_sample(1, 4)).is_none());
        assert!(sync.route(Peer::Server, character_sample(1, 5)).is_none());
        assert!(sync.route(Peer::Server, character_sample(1, 6)).is_some());
        // Stamps wrap.
        sync.add_object(SyncId::Entity(2), true);
        assert!(sync.route(Peer::Server, character_sample(2, u32::MAX)).is_some());
        assert!(sync.route(Peer::Server, character_sample(2, 1)).is_some());
    }

    #[test]
    fn unknown_entities_and_foreign_kinds_are_dropped() {
        let (mut sync, _t) = manager(Role::Server);
        let input = Message::ManualControlInput {
            entity_id: 8,
            movement: [0.0; 3],
            look: [0.0; 3],
            sample: 1,
        };
        assert!(sync.route(Peer::Client(1), input.clone()).is_none());
        sync.add_object(SyncId::Entity(8), true);
        assert!(matches!(
            sync.route(Peer::Client(1), input),
            Some(Routed::Entity { id: 8, .. })
        ));

        // Servers never apply entity additions from clients.
        let add = Message::AddEntity {
            entity_id: 1,
            model: "crate.model".to_string(),
            position: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
        };
        assert!(sync.route(Peer::Client(1), add).is_none());
    }

    #[test]
    fn drains_connection_events_and_messages() {
        let (mut sync, transport) = manager(Role::Server);
        transport.deliver(Inbound::Connected {
            client: 2,
            name: "bob".to_string(),
        });
        transport.deliver(Inbound::Message {
            from: Peer::Client(2),
            message: Message::RemovePlayer { player_id: 1 },
        });
        transport.deliver(Inbound::Message {
            from: Peer::Client(2),
            message: Message::ChatText {
                text: "hi".to_string(),
            },
        });

        assert!(matches!(
            sync.next_inbound(),
            Some(Routed::Connected { client: 2, .. })
        ));
        // RemovePlayer is not accepted from clients and is skipped.
        assert!(matches!(
            sync.next_inbound(),
            Some(Routed::World {
                from: Peer::Client(2),
                message: Message::ChatText { .. }
            })
        ));
        assert_eq!(sync.next_inbound(), None);
    }

    #[test]
    fn broadcast_targets_by_role() {
        let (server, mut st) = manager(Role::Server);
        server.broadcast(Message::StartGame {
            level: "arena".to_string(),
        });
        server.send_to(4, Message::JoinAccepted {
            player_id: 1,
            group_id: 0,
        });
        assert_eq!(st.try_next_outbound().unwrap().target, Target::AllClients);
        assert_eq!(st.try_next_outbound().unwrap().target, Target::Client(4));

        let (client, mut ct) = manager(Role::Client);
        client.broadcast(Message::ChatText {
            text: "yo".to_string(),
        });
        client.send_to(4, Message::ChatText {
            text: "nope".to_string(),
        });
        assert_eq!(ct.try_next_outbound().unwrap().target, Target::Server);
        assert!(ct.try_next_outbound().is_none());
    }

    #[test]
    fn sample_stamps_skip_zero() {
        let (mut sync, _t) = manager(Role::Server);
        sync.next_sample = u32::MAX;
        assert_eq!(sync.next_sample(), u32::MAX);
        assert_eq!(sync.next_sample(), 1);
    }
}
