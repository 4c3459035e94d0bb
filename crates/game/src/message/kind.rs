use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReliabilityMode {
    /// Best effort; a later sample supersedes an earlier one.
    Unreliable,
    /// Guaranteed delivery in production order.
    Reliable,
}

impl ReliabilityMode {
    pub fn is_reliable(&self) -> bool {
        matches!(self, Self::Reliable)
    }
}

/// Stable wire tag for each message variant. Values are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    AddPlayer = 0,
    RemovePlayer = 1,
    AddEntity = 2,
    RemoveEntity = 3,
    EnterEntity = 4,
    SyncRigidBody = 5,
    SyncCharacter = 6,
    ManualControlInput = 7,
    ChatText = 8,
    StartGame = 9,
    JoinAccepted = 10,
    PlayEffect = 11,
}

impl MessageKind {
    pub const ALL: [MessageKind; 12] = [
        Self::AddPlayer,
        Self::RemovePlayer,
        Self::AddEntity,
        Self::RemoveEntity,
        Self::EnterEntity,
        Self::SyncRigidBody,
        Self::SyncCharacter,
        Self::ManualControlInput,
        Self::ChatText,
        Self::StartGame,
        Self::JoinAccepted,
        Self::PlayEffect,
    ];

    pub fn tag(self) -> u16 {
        self as u16
    }

    pub fn from_tag(tag: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.tag() == tag)
    }

    pub fn reliability(self) -> ReliabilityMode {
        match self {
            Self::AddPlayer
            | Self::RemovePlayer
            | Self::AddEntity
            | Self::RemoveEntity
            | Self::EnterEntity
            | Self::ChatText
            | Self::StartGame
            | Self::JoinAccepted => ReliabilityMode::Reliable,

            Self::SyncRigidBody
            | Self::SyncCharacter
            | Self::ManualControlInput
            | Self::PlayEffect => ReliabilityMode::Unreliable,
        }
    }

    pub fn flag(self) -> MessageKinds {
        MessageKinds::from_bits_truncate(1 << self.tag())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MessageKinds: u32 {
        const ADD_PLAYER = 1 << 0;
        const REMOVE_PLAYER = 1 << 1;
        const ADD_ENTITY = 1 << 2;
        const REMOVE_ENTITY = 1 << 3;
        const ENTER_ENTITY = 1 << 4;
        const SYNC_RIGID_BODY = 1 << 5;
        const SYNC_CHARACTER = 1 << 6;
        const MANUAL_CONTROL_INPUT = 1 << 7;
        const CHAT_TEXT = 1 << 8;
        const START_GAME = 1 << 9;
        const JOIN_ACCEPTED = 1 << 10;
        const PLAY_EFFECT = 1 << 11;
    }
}

impl MessageKinds {
    /// What a server accepts from its clients.
    pub const SERVER_INBOUND: Self = Self::MANUAL_CONTROL_INPUT
        .union(Self::CHAT_TEXT)
        .union(Self::START_GAME);

    /// What a client accepts from the server.
    pub const CLIENT_INBOUND: Self = Self::ADD_PLAYER
        .union(Self::REMOVE_PLAYER)
        .union(Self::ADD_ENTITY)
        .union(Self::REMOVE_ENTITY)
        .union(Self::ENTER_ENTITY)
        .union(Self::SYNC_RIGID_BODY)
        .union(Self::SYNC_CHARACTER)
        .union(Self::CHAT_TEXT)
        .union(Self::START_GAME)
        .union(Self::JOIN_ACCEPTED)
        .union(Self::PLAY_EFFECT);

    pub fn accepts(&self, kind: MessageKind) -> bool {
        self.contains(kind.flag())
    }
}
