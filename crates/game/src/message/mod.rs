//! Replicated message contract between server and clients.
//!
//! Variants are only ever appended: the archived discriminant follows declaration
//! order and [`MessageKind`] tags are fixed, so existing peers keep decoding the
//! variants they know about.

mod kind;

use glam::{Quat, Vec3};
use rkyv::{Archive, Deserialize, Serialize};

pub use kind::{MessageKind, MessageKinds, ReliabilityMode};

use crate::sync::SyncId;
use crate::types::{EntityId, GroupId, PlayerId};

/// Longest chat line carried on the wire, in characters.
pub const MAX_CHAT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum Message {
    AddPlayer {
        player_id: PlayerId,
        name: String,
        group_id: GroupId,
        ai_kind: Option<u8>,
    },
    RemovePlayer {
        player_id: PlayerId,
    },
    AddEntity {
        entity_id: EntityId,
        model: String,
        position: [f32; 3],
        rotation: [f32; 4],
    },
    RemoveEntity {
        entity_id: EntityId,
    },
    /// `entity_id: None` means the player leaves whatever it controls.
    EnterEntity {
        player_id: PlayerId,
        entity_id: Option<EntityId>,
    },
    SyncRigidBody {
        entity_id: EntityId,
        position: [f32; 3],
        rotation: [f32; 4],
        linear_velocity: [f32; 3],
        angular_velocity: [f32; 3],
        sample: u32,
    },
    SyncCharacter {
        entity_id: EntityId,
        position: [f32; 3],
        rotation: [f32; 4],
        walk_direction: [f32; 3],
        sample: u32,
    },
    ManualControlInput {
        entity_id: EntityId,
        movement: [f32; 3],
        look: [f32; 3],
        sample: u32,
    },
    ChatText {
        text: String,
    },
    /// An empty level closes the current one.
    StartGame {
        level: String,
    },
    JoinAccepted {
        player_id: PlayerId,
        group_id: GroupId,
    },
    PlayEffect {
        effect: String,
        position: [f32; 3],
        rotation: [f32; 4],
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::AddPlayer { .. } => MessageKind::AddPlayer,
            Self::RemovePlayer { .. } => MessageKind::RemovePlayer,
            Self::AddEntity { .. } => MessageKind::AddEntity,
            Self::RemoveEntity { .. } => MessageKind::RemoveEntity,
            Self::EnterEntity { .. } => MessageKind::EnterEntity,
            Self::SyncRigidBody { .. } => MessageKind::SyncRigidBody,
            Self::SyncCharacter { .. } => MessageKind::SyncCharacter,
            Self::ManualControlInput { .. } => MessageKind::ManualControlInput,
            Self::ChatText { .. } => MessageKind::ChatText,
            Self::StartGame { .. } => MessageKind::StartGame,
            Self::JoinAccepted { .. } => MessageKind::JoinAccepted,
            Self::PlayEffect { .. } => MessageKind::PlayEffect,
        }
    }

    pub fn reliability(&self) -> ReliabilityMode {
        self.kind().reliability()
    }

    pub fn is_reliable(&self) -> bool {
        self.reliability().is_reliable()
    }

    pub fn sync_id(&self) -> SyncId {
        match self {
            Self::SyncRigidBody { entity_id, .. }
            | Self::SyncCharacter { entity_id, .. }
            | Self::ManualControlInput { entity_id, .. } => SyncId::Entity(*entity_id),
            Self::PlayEffect { .. } => SyncId::Effects,
            _ => SyncId::World,
        }
    }

    /// Generation stamp of transform samples and input, if the variant carries one.
    pub fn sample(&self) -> Option<u32> {
        match self {
            Self::SyncRigidBody { sample, .. }
            | Self::SyncCharacter { sample, .. }
            | Self::ManualControlInput { sample, .. } => Some(*sample),
            _ => None,
        }
    }

    pub fn add_entity(entity_id: EntityId, model: &str, position: Vec3, rotation: Quat) -> Self {
        Self::AddEntity {
            entity_id,
            model: model.to_string(),
            position: position.to_array(),
            rotation: rotation.to_array(),
        }
    }

    /// Chat line clipped to [`MAX_CHAT_CHARS`].
    pub fn chat(text: &str) -> Self {
        Self::ChatText {
            text: text.chars().take(MAX_CHAT_CHARS).collect(),
        }
    }

    pub fn play_effect(effect: &str, position: Vec3, rotation: Quat) -> Self {
        Self::PlayEffect {
            effect: effect.to_string(),
            position: position.to_array(),
            rotation: rotation.to_array(),
        }
    }
}

pub(crate) fn wire_quat(rotation: [f32; 4]) -> Quat {
    let quat = Quat::from_array(rotation);
    if quat.length_squared() < 1e-6 {
        Quat::IDENTITY
    } else {
        quat.normalize()
    }
}
