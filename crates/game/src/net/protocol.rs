use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::message::Message;

pub const MAX_PACKET_SIZE: usize = 1200;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x5A4F_4E45;
pub const DEFAULT_PORT: u16 = 27016;

/// Room left in a packet for the header and archive bookkeeping.
const PACKET_OVERHEAD: usize = 160;
const ENTRY_OVERHEAD: usize = 16;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
    pub sequence: u32,
    pub ack: u32,
    pub ack_bitfield: u32,
}

impl PacketHeader {
    pub fn new(sequence: u32, ack: u32, ack_bitfield: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            sequence,
            ack,
            ack_bitfield,
        }
    }

    /// Header for handshake and keepalive packets, which sit outside the
    /// sequenced channel.
    pub fn control() -> Self {
        Self::new(0, 0, 0)
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

/// Wrap-aware `s1 > s2`.
#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ReliableEntry {
    pub index: u32,
    pub message: Message,
}

#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Payload {
    pub reliable: Vec<ReliableEntry>,
    pub unreliable: Vec<Message>,
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        self.reliable.is_empty() && self.unreliable.is_empty()
    }
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PacketType {
    ConnectionRequest { client_salt: u64, name: String },
    ConnectionChallenge { server_salt: u64 },
    ChallengeResponse { combined_salt: u64 },
    ConnectionAccepted { client_id: u32 },
    ConnectionDenied { reason: String },
    Payload(Payload),
    Ping { timestamp: u64 },
    Pong { timestamp: u64 },
    Disconnect,
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: PacketType,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

impl Packet {
    pub fn new(header: PacketHeader, payload: PacketType) -> Self {
        Self { header, payload }
    }

    pub fn control(payload: PacketType) -> Self {
        Self::new(PacketHeader::control(), payload)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(PacketError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        rkyv::from_bytes::<Self, rancor::Error>(data).map_err(PacketError::Deserialize)
    }
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>, PacketError> {
    rkyv::to_bytes::<rancor::Error>(message)
        .map(|aligned| aligned.into_vec())
        .map_err(PacketError::Serialize)
}

pub fn decode_message(data: &[u8]) -> Result<Message, PacketError> {
    rkyv::from_bytes::<Message, rancor::Error>(data).map_err(PacketError::Deserialize)
}

/// Estimated space a message takes inside a payload.
pub fn payload_cost(message: &Message) -> usize {
    encode_message(message).map_or(MAX_PACKET_SIZE, |bytes| bytes.len()) + ENTRY_OVERHEAD
}

pub fn payload_budget() -> usize {
    MAX_PACKET_SIZE - PACKET_OVERHEAD
}
