use std::collections::BTreeMap;

use crate::control::Controller;
use crate::physics::{BodyHandle, BodyKind};
use crate::types::{EntityId, GroupId, PlayerId};

#[derive(Debug)]
pub struct EntityRecord {
    pub id: EntityId,
    pub model: String,
    pub kind: BodyKind,
    pub body: BodyHandle,
    pub player_id: Option<PlayerId>,
    pub group_id: Option<GroupId>,
    pub control: Controller,
}

impl EntityRecord {
    pub fn new(id: EntityId, model: &str, kind: BodyKind, body: BodyHandle) -> Self {
        Self {
            id,
            model: model.to_string(),
            kind,
            body,
            player_id: None,
            group_id: None,
            control: Controller::default(),
        }
    }
}

/// Live entities by id. Bodies themselves belong to the physics space.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<EntityId, EntityRecord>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest id not currently in use.
    pub fn allocate_id(&self) -> EntityId {
        self.entities
            .keys()
            .zip(0..)
            .find(|&(&used, candidate)| used != candidate)
            .map_or(self.entities.len() as EntityId, |(_, candidate)| candidate)
    }

    /// Returns the record previously stored under the same id.
    pub fn insert(&mut self, record: EntityRecord) -> Option<EntityRecord> {
        self.entities.insert(record.id, record)
    }

    pub fn remove(&mut self, id: EntityId) -> Option<EntityRecord> {
        self.entities.remove(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityRecord> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut EntityRecord> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn find_entity_id(&self, body: BodyHandle) -> Option<EntityId> {
        self.entities
            .values()
            .find(|record| record.body == body)
            .map(|record| record.id)
    }

    pub fn controlled_by(&self, player: PlayerId) -> Option<EntityId> {
        self.entities
            .values()
            .find(|record| record.player_id == Some(player))
            .map(|record| record.id)
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EntityRecord> {
        self.entities.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: EntityId) -> EntityRecord {
        EntityRecord::new(id, "crate.model", BodyKind::Rigid, BodyHandle(id + 100))
    }

    #[test]
    fn allocates_smallest_free_id() {
        let mut registry = EntityRegistry::new();
        assert_eq!(registry.allocate_id(), 0);

        for id in [0, 1, 3] {
            registry.insert(record(id));
        }
        assert_eq!(registry.allocate_id(), 2);

        registry.insert(record(2));
        assert_eq!(registry.allocate_id(), 4);

        registry.remove(0);
        assert_eq!(registry.allocate_id(), 0);
    }

    #[test]
    fn reverse_lookup_by_body() {
        let mut registry = EntityRegistry::new();
        registry.insert(record(5));

        assert_eq!(registry.find_entity_id(BodyHandle(105)), Some(5));
        assert_eq!(registry.find_entity_id(BodyHandle(1)), None);
    }

    #[test]
    fn controlled_by_follows_tags() {
        let mut registry = EntityRegistry::new();
        registry.insert(record(1));
        assert_eq!(registry.controlled_by(7), None);

        if let Some(r) = registry.get_mut(1) {
            r.player_id = Some(7);
        }
        assert_eq!(registry.controlled_by(7), Some(1));
    }
}
