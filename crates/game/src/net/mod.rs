//! Transports carrying [`Message`]s between server and clients.
//!
//! The simulation never touches a transport directly: a [`NetworkPump`]
//! owns it on its own thread and exchanges [`Inbound`] events and
//! [`Outbound`] messages with the tick through the channels of a [`NetLink`].

mod connection;
mod endpoint;
mod memory;
mod protocol;
mod pump;
mod reliable;
mod stats;
mod tracking;
mod udp;

pub use connection::{Connection, ConnectionManager, ConnectionState, PeerChannel};
pub use endpoint::NetworkEndpoint;
pub use memory::{MemoryHub, MemoryTransport};
pub use protocol::{
    DEFAULT_PORT, MAX_PACKET_SIZE, PROTOCOL_MAGIC, PROTOCOL_VERSION, Packet, PacketError,
    PacketHeader, PacketType, Payload, ReliableEntry, decode_message, encode_message,
    payload_budget, payload_cost, sequence_greater_than,
};
pub use pump::{NetLink, NetworkPump, TransportLink, link};
pub use reliable::{OrderedReceiver, RELIABLE_WINDOW, ReliableSender};
pub use stats::{LossSimulation, NetworkStats};
pub use tracking::{AckTracker, ReceiveTracker};
pub use udp::{UdpClientTransport, UdpServerTransport};

use crate::message::Message;
use crate::types::{ClientId, Peer};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("packet of {0} bytes exceeds the MTU")]
    Oversize(usize),
    #[error("connection denied: {0}")]
    Denied(String),
    #[error("server is full")]
    ServerFull,
    #[error("connection attempt timed out")]
    Timeout,
    #[error("transport is closed")]
    Closed,
    #[error("unknown client {0}")]
    UnknownClient(ClientId),
    #[error("target {0:?} is not reachable from this side")]
    InvalidTarget(Target),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Server,
    Client(ClientId),
    AllClients,
    AllClientsExcept(ClientId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A client completed its handshake. Server side only.
    Connected { client: ClientId, name: String },
    /// A client left or timed out; on a client, the server went away.
    Disconnected { client: ClientId },
    Message { from: Peer, message: Message },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub target: Target,
    pub message: Message,
}

/// A message transport. `poll` is the receive side; `flush` puts queued
/// messages on the wire.
pub trait Transport: Send {
    fn send(&mut self, target: Target, message: &Message, reliable: bool)
    -> Result<(), TransportError>;

    fn broadcast(&mut self, message: &Message, reliable: bool) -> Result<(), TransportError>;

    fn poll(&mut self) -> Result<Vec<Inbound>, TransportError>;

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn close(&mut self);

    fn is_open(&self) -> bool;
}
