pub type EntityId = u32;
pub type PlayerId = u32;
pub type GroupId = u32;
pub type ClientId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub fn is_authoritative(self) -> bool {
        matches!(self, Self::Server)
    }
}

/// The remote end a control assignment or message is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Peer {
    Server,
    Client(ClientId),
}

/// Autonomous behaviour kinds. Humans carry no kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AiKind {
    Default = 0,
    Worker = 1,
    Fighter = 2,
}

impl AiKind {
    pub fn from_wire(value: Option<u8>) -> Option<Self> {
        match value? {
            0 => Some(Self::Default),
            1 => Some(Self::Worker),
            2 => Some(Self::Fighter),
            other => {
                log::warn!("Unknown ai kind {}, falling back to default", other);
                Some(Self::Default)
            }
        }
    }

    pub fn to_wire(kind: Option<Self>) -> Option<u8> {
        kind.map(|k| k as u8)
    }
}
