use std::collections::BTreeMap;

use crate::notify::PlayerSummary;
use crate::types::{AiKind, ClientId, EntityId, GroupId, PlayerId};

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub group: GroupId,
    pub ai: Option<AiKind>,
    pub entity: Option<EntityId>,
    pub client: Option<ClientId>,
    attributes: BTreeMap<String, AttributeValue>,
}

impl Player {
    pub fn new(id: PlayerId, name: &str, group: GroupId, ai: Option<AiKind>) -> Self {
        Self {
            id,
            name: name.to_string(),
            group,
            ai,
            entity: None,
            client: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_client(mut self, client: ClientId) -> Self {
        self.client = Some(client);
        self
    }

    pub fn is_human(&self) -> bool {
        self.ai.is_none()
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: &str, value: AttributeValue) -> Option<AttributeValue> {
        self.attributes.insert(key.to_string(), value)
    }

    pub fn summary(&self) -> PlayerSummary {
        PlayerSummary {
            id: self.id,
            name: self.name.clone(),
            group: self.group,
            human: self.is_human(),
            entity: self.entity,
        }
    }
}

#[derive(Debug, Default)]
pub struct PlayerDirectory {
    players: BTreeMap<PlayerId, Player>,
}

impl PlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest unused id, starting at 1.
    pub fn allocate_id(&self) -> PlayerId {
        (1..)
            .find(|id| !self.players.contains_key(id))
            .unwrap_or(PlayerId::MAX)
    }

    pub fn insert(&mut self, player: Player) -> Option<Player> {
        self.players.insert(player.id, player)
    }

    pub fn remove(&mut self, id: PlayerId) -> Option<Player> {
        self.players.remove(&id)
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn is_human(&self, id: PlayerId) -> Option<bool> {
        self.get(id).map(Player::is_human)
    }

    pub fn by_client(&self, client: ClientId) -> Option<PlayerId> {
        self.players
            .values()
            .find(|p| p.client == Some(client))
            .map(|p| p.id)
    }

    pub fn human_players(&self) -> Vec<&Player> {
        self.players.values().filter(|p| p.is_human()).collect()
    }

    pub fn attribute(&self, id: PlayerId, key: &str) -> Option<&AttributeValue> {
        self.get(id)?.attribute(key)
    }

    pub fn set_attribute(&mut self, id: PlayerId, key: &str, value: AttributeValue) -> bool {
        match self.get_mut(id) {
            Some(player) => {
                player.set_attribute(key, value);
                true
            }
            None => {
                log::warn!("Cannot set '{}' on unknown player {}", key, id);
                false
            }
        }
    }

    pub fn summaries(&self) -> Vec<PlayerSummary> {
        self.players.values().map(Player::summary).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
