use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::protocol::{decode_message, encode_message};
use super::stats::LossSimulation;
use super::{Inbound, Target, Transport, TransportError};
use crate::message::Message;
use crate::types::{ClientId, Peer};

#[derive(Debug)]
enum Frame {
    Connect(String),
    Disconnect,
    Data(Vec<u8>),
}

#[derive(Debug)]
struct ClientSlot {
    inbox: VecDeque<Frame>,
    open: bool,
}

#[derive(Debug)]
struct HubState {
    server_open: bool,
    next_client: ClientId,
    max_clients: usize,
    clients: BTreeMap<ClientId, ClientSlot>,
    server_inbox: VecDeque<(ClientId, Frame)>,
    loss: LossSimulation,
}

/// In-process switchboard connecting one server transport with any number
/// of client transports. Messages still go through the wire codec;
/// unreliable ones can be dropped by a [`LossSimulation`].
#[derive(Debug, Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::with_limits(usize::MAX, LossSimulation::disabled())
    }

    pub fn with_limits(max_clients: usize, loss: LossSimulation) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                server_open: true,
                next_client: 1,
                max_clients,
                clients: BTreeMap::new(),
                server_inbox: VecDeque::new(),
                loss,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn server(&self) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            side: Side::Server,
            open: true,
        }
    }

    pub fn connect(&self, name: &str) -> Result<MemoryTransport, TransportError> {
        let mut state = self.lock();
        if !state.server_open {
            return Err(TransportError::Closed);
        }
        let open_clients = state.clients.values().filter(|c| c.open).count();
        if open_clients >= state.max_clients {
            return Err(TransportError::ServerFull);
        }

        let id = state.next_client;
        state.next_client += 1;
        state.clients.insert(
            id,
            ClientSlot {
                inbox: VecDeque::new(),
                open: true,
            },
        );
        state
            .server_inbox
            .push_back((id, Frame::Connect(name.to_string())));
        drop(state);

        log::debug!("Memory client {} ({}) connected", id, name);
        Ok(MemoryTransport {
            hub: self.clone(),
            side: Side::Client(id),
            open: true,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Server,
    Client(ClientId),
}

#[derive(Debug)]
pub struct MemoryTransport {
    hub: MemoryHub,
    side: Side,
    open: bool,
}

impl MemoryTransport {
    pub fn client_id(&self) -> Option<ClientId> {
        match self.side {
            Side::Server => None,
            Side::Client(id) => Some(id),
        }
    }

    fn deliver(
        state: &mut HubState,
        client: ClientId,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        match state.clients.get_mut(&client) {
            Some(slot) if slot.open => {
                slot.inbox.push_back(Frame::Data(bytes.to_vec()));
                Ok(())
            }
            _ => Err(TransportError::UnknownClient(client)),
        }
    }

    fn decode(frame_owner: Peer, bytes: &[u8]) -> Option<Inbound> {
        match decode_message(bytes) {
            Ok(message) => Some(Inbound::Message {
                from: frame_owner,
                message,
            }),
            Err(e) => {
                log::warn!("Dropping undecodable message from {:?}: {}", frame_owner, e);
                None
            }
        }
    }
}

impl Transport for MemoryTransport {
    fn send(
        &mut self,
        target: Target,
        message: &Message,
        reliable: bool,
    ) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let bytes = encode_message(message)?;

        let mut state = self.hub.lock();
        if !reliable && state.loss.should_drop() {
            return Ok(());
        }

        match (self.side, target) {
            (Side::Client(id), Target::Server) => {
                if !state.server_open {
                    return Err(TransportError::Closed);
                }
                state.server_inbox.push_back((id, Frame::Data(bytes)));
                Ok(())
            }
            (Side::Server, Target::Client(client)) => Self::deliver(&mut state, client, &bytes),
            (Side::Server, Target::AllClients) => {
                for slot in state.clients.values_mut().filter(|s| s.open) {
                    slot.inbox.push_back(Frame::Data(bytes.clone()));
                }
                Ok(())
            }
            (Side::Server, Target::AllClientsExcept(skip)) => {
                for (_, slot) in state
                    .clients
                    .iter_mut()
                    .filter(|(id, s)| s.open && **id != skip)
                {
                    slot.inbox.push_back(Frame::Data(bytes.clone()));
                }
                Ok(())
            }
            (_, target) => Err(TransportError::InvalidTarget(target)),
        }
    }

    fn broadcast(&mut self, message: &Message, reliable: bool) -> Result<(), TransportError> {
        let target = match self.side {
            Side::Server => Target::AllClients,
            Side::Client(_) => Target::Server,
        };
        self.send(target, message, reliable)
    }

    fn poll(&mut self) -> Result<Vec<Inbound>, TransportError> {
        if !self.open {
            return Ok(Vec::new());
        }

        let mut state = self.hub.lock();
        let mut events = Vec::new();

        match self.side {
            Side::Server => {
                while let Some((client, frame)) = state.server_inbox.pop_front() {
                    match frame {
                        Frame::Connect(name) => events.push(Inbound::Connected { client, name }),
                        Frame::Disconnect => events.push(Inbound::Disconnected { client }),
                        Frame::Data(bytes) => {
                            events.extend(Self::decode(Peer::Client(client), &bytes));
                        }
                    }
                }
            }
            Side::Client(id) => {
                let Some(slot) = state.clients.get_mut(&id) else {
                    return Ok(events);
                };
                while let Some(frame) = slot.inbox.pop_front() {
                    match frame {
                        Frame::Data(bytes) => events.extend(Self::decode(Peer::Server, &bytes)),
                        Frame::Disconnect => {
                            events.push(Inbound::Disconnected { client: id });
                            slot.open = false;
                            self.open = false;
                        }
                        Frame::Connect(_) => {}
                    }
                }
            }
        }

        Ok(events)
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        let mut state = self.hub.lock();
        match self.side {
            Side::Server => {
                state.server_open = false;
                for slot in state.clients.values_mut() {
                    slot.inbox.push_back(Frame::Disconnect);
                }
            }
            Side::Client(id) => {
                if let Some(slot) = state.clients.get_mut(&id) {
                    slot.open = false;
                    slot.inbox.clear();
                }
                if state.server_open {
                    state.server_inbox.push_back((id, Frame::Disconnect));
                }
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
