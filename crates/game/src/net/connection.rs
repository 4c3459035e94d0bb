use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::TransportError;
use super::protocol::{
    Packet, PacketHeader, PacketType, Payload, ReliableEntry, payload_budget, payload_cost,
};
use super::reliable::{OrderedReceiver, ReliableSender};
use super::stats::random_salt;
use super::tracking::{AckTracker, ReceiveTracker};
use crate::message::Message;
use crate::types::ClientId;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ChallengeResponse,
    Connected,
}

/// Sequenced, acknowledged message channel to one peer. Reliable messages
/// are resent until acked and released in order; unreliable ones go out once.
#[derive(Debug)]
pub struct PeerChannel {
    send_sequence: u32,
    acks: AckTracker,
    received: ReceiveTracker,
    reliable_out: ReliableSender,
    reliable_in: OrderedReceiver,
    unreliable_out: Vec<Message>,
    ack_owed: bool,
}

impl Default for PeerChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerChannel {
    pub fn new() -> Self {
        Self {
            send_sequence: 1,
            acks: AckTracker::new(256),
            received: ReceiveTracker::new(),
            reliable_out: ReliableSender::new(),
            reliable_in: OrderedReceiver::new(),
            unreliable_out: Vec::new(),
            ack_owed: false,
        }
    }

    /// Fails with `Oversize` before a reliable index is taken when the message
    /// cannot fit in one packet.
    pub fn queue(&mut self, message: Message, reliable: bool) -> Result<(), TransportError> {
        let cost = payload_cost(&message);
        if cost > payload_budget() {
            return Err(TransportError::Oversize(cost));
        }
        if reliable {
            self.reliable_out.push(message);
        } else {
            self.unreliable_out.push(message);
        }
        Ok(())
    }

    /// Handles an incoming payload packet and returns its deliverable messages:
    /// released reliable ones first, then the unreliable ones. Duplicate
    /// packets yield nothing.
    pub fn receive(&mut self, header: &PacketHeader, payload: Payload) -> Vec<Message> {
        let delivered = self.acks.process_ack(header.ack, header.ack_bitfield);
        self.reliable_out.acknowledge(&delivered);

        if !self.received.record(header.sequence) {
            return Vec::new();
        }
        self.ack_owed = true;

        let mut messages = Vec::new();
        for entry in payload.reliable {
            messages.extend(self.reliable_in.receive(entry.index, entry.message));
        }
        messages.extend(payload.unreliable);
        messages
    }

    /// Packs everything that is due into packets. Sends a bare ack when there
    /// is nothing else to say but something was received.
    pub fn outgoing(&mut self, now: Instant) -> Vec<Packet> {
        let due = self.reliable_out.due(now, self.acks.resend_timeout());
        let unreliable = std::mem::take(&mut self.unreliable_out);

        let budget = payload_budget();
        let mut payloads: Vec<(Payload, Vec<u32>)> = Vec::new();
        let mut current = Payload::default();
        let mut indices = Vec::new();
        let mut used = 0;

        let mut sent = Vec::new();
        for (index, message) in due {
            let cost = payload_cost(&message);
            if used + cost > budget {
                payloads.push((std::mem::take(&mut current), std::mem::take(&mut indices)));
                used = 0;
            }
            used += cost;
            indices.push(index);
            sent.push(index);
            current.reliable.push(ReliableEntry { index, message });
        }

        for message in unreliable {
            let cost = payload_cost(&message);
            if used + cost > budget {
                payloads.push((std::mem::take(&mut current), std::mem::take(&mut indices)));
                used = 0;
            }
            used += cost;
            current.unreliable.push(message);
        }

        if !current.is_empty() || (payloads.is_empty() && self.ack_owed) {
            payloads.push((current, indices));
        }

        self.reliable_out.mark_sent(&sent, now);
        self.ack_owed = false;

        payloads
            .into_iter()
            .map(|(payload, reliable)| {
                let header = self.next_header();
                self.acks.track(header.sequence, reliable);
                Packet::new(header, PacketType::Payload(payload))
            })
            .collect()
    }

    fn next_header(&mut self) -> PacketHeader {
        let sequence = self.send_sequence;
        self.send_sequence = match self.send_sequence.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        let (ack, ack_bitfield) = self.received.ack_data();
        PacketHeader::new(sequence, ack, ack_bitfield)
    }

    pub fn rtt_ms(&self) -> f32 {
        self.acks.srtt()
    }

    pub fn lost_packets(&self) -> u64 {
        self.acks.lost()
    }

    pub fn unacked_reliable(&self) -> usize {
        self.reliable_out.unacked_count()
    }
}

#[derive(Debug)]
pub struct Connection {
    pub addr: SocketAddr,
    pub client_id: ClientId,
    pub name: String,
    pub state: ConnectionState,
    pub client_salt: u64,
    pub server_salt: u64,
    pub last_receive_time: Instant,
    pub channel: PeerChannel,
}

impl Connection {
    pub fn new(addr: SocketAddr, client_id: ClientId, client_salt: u64, name: &str) -> Self {
        Self {
            addr,
            client_id,
            name: name.to_string(),
            state: ConnectionState::Connecting,
            client_salt,
            server_salt: random_salt(),
            last_receive_time: Instant::now(),
            channel: PeerChannel::new(),
        }
    }

    pub fn combined_salt(&self) -> u64 {
        self.client_salt ^ self.server_salt
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    clients_by_addr: HashMap<SocketAddr, ClientId>,
    clients: HashMap<ClientId, Connection>,
    next_client_id: ClientId,
    max_clients: usize,
    timeout: Duration,
}

impl ConnectionManager {
    pub fn new(max_clients: usize) -> Self {
        Self::with_timeout(max_clients, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients_by_addr: HashMap::new(),
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    pub fn get_or_create_pending(
        &mut self,
        addr: SocketAddr,
        client_salt: u64,
        name: &str,
    ) -> Result<&mut Connection, TransportError> {
        let client_id = match self.clients_by_addr.get(&addr) {
            Some(&id) => id,
            None => {
                if self.clients.len() >= self.max_clients {
                    return Err(TransportError::ServerFull);
                }
                let id = self.next_client_id;
                self.next_client_id = self.next_client_id.wrapping_add(1).max(1);
                self.clients_by_addr.insert(addr, id);
                id
            }
        };

        Ok(self
            .clients
            .entry(client_id)
            .or_insert_with(|| Connection::new(addr, client_id, client_salt, name)))
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut Connection> {
        let id = self.clients_by_addr.get(addr)?;
        self.clients.get_mut(id)
    }

    pub fn get_mut(&mut self, client_id: ClientId) -> Option<&mut Connection> {
        self.clients.get_mut(&client_id)
    }

    pub fn remove(&mut self, client_id: ClientId) -> Option<Connection> {
        let conn = self.clients.remove(&client_id)?;
        self.clients_by_addr.remove(&conn.addr);
        Some(conn)
    }

    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<Connection> {
        let client_id = self.clients_by_addr.remove(addr)?;
        self.clients.remove(&client_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.clients.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.clients.values_mut()
    }

    pub fn cleanup_timed_out(&mut self) -> Vec<Connection> {
        let timed_out: Vec<ClientId> = self
            .clients
            .values()
            .filter(|c| c.is_timed_out(self.timeout))
            .map(|c| c.client_id)
            .collect();

        timed_out.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn connected_count(&self) -> usize {
        self.clients.values().filter(|c| c.is_connected()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn chat(text: &str) -> Message {
        Message::ChatText {
            text: text.to_string(),
        }
    }

    fn payload_of(packet: Packet) -> (PacketHeader, Payload) {
        match packet.payload {
            PacketType::Payload(p) => (packet.header, p),
            other => panic!("expected payload, got {other:?}"),
        }
    }

    #[test]
    fn reliable_messages_survive_a_lost_packet() {
        let mut a = PeerChannel::new();
        let mut b = PeerChannel::new();

        a.queue(chat("one"), true).unwrap();
        a.queue(chat("two"), true).unwrap();
        let lost = a.outgoing(Instant::now());
        assert_eq!(lost.len(), 1);

        // Nothing arrives; after the resend timeout both go out again.
        let later = Instant::now() + Duration::from_secs(2);
        let resent = a.outgoing(later);
        assert_eq!(resent.len(), 1);

        let (header, payload) = payload_of(resent.into_iter().next().unwrap());
        assert_eq!(b.receive(&header, payload), vec![chat("one"), chat("two")]);

        // b acks; a stops resending.
        let acks = b.outgoing(Instant::now());
        let (header, payload) = payload_of(acks.into_iter().next().unwrap());
        assert!(a.receive(&header, payload).is_empty());
        assert_eq!(a.unacked_reliable(), 0);
    }

    #[test]
    fn duplicate_packets_deliver_once() {
        let mut a = PeerChannel::new();
        let mut b = PeerChannel::new();

        a.queue(chat("x"), false).unwrap();
        let (header, payload) = payload_of(a.outgoing(Instant::now()).remove(0));

        assert_eq!(b.receive(&header, payload.clone()), vec![chat("x")]);
        assert!(b.receive(&header, payload).is_empty());
    }

    #[test]
    fn large_batches_split_across_packets() {
        let mut a = PeerChannel::new();
        for i in 0..100 {
            a.queue(chat(&format!("message {i}")), true).unwrap();
        }
        let packets = a.outgoing(Instant::now());
        assert!(packets.len() > 1);
        for packet in packets {
            assert!(packet.serialize().unwrap().len() <= super::super::protocol::MAX_PACKET_SIZE);
        }
    }

    #[test]
    fn oversized_message_is_rejected_without_stalling_the_channel() {
        let mut a = PeerChannel::new();
        let mut b = PeerChannel::new();

        let big = chat(&"x".repeat(1100));
        assert!(matches!(
            a.queue(big.clone(), true),
            Err(TransportError::Oversize(_))
        ));
        assert!(matches!(a.queue(big, false), Err(TransportError::Oversize(_))));
        a.queue(chat("after"), true).unwrap();

        let now = Instant::now();
        let mut delivered = Vec::new();
        for packet in a.outgoing(now) {
            let (header, payload) = payload_of(packet);
            delivered.extend(b.receive(&header, payload));
        }
        assert_eq!(delivered, vec![chat("after")]);
        assert_eq!(a.unacked_reliable(), 1);
    }

    #[test]
    fn idle_channel_sends_nothing() {
        let mut a = PeerChannel::new();
        assert!(a.outgoing(Instant::now()).is_empty());
    }

    #[test]
    fn connection_manager_limits_clients() {
        let mut manager = ConnectionManager::new(1);
        let id = manager
            .get_or_create_pending(addr(1000), 5, "alice")
            .unwrap()
            .client_id;
        // Same address returns the same pending connection.
        assert_eq!(
            manager
                .get_or_create_pending(addr(1000), 5, "alice")
                .unwrap()
                .client_id,
            id
        );
        assert!(matches!(
            manager.get_or_create_pending(addr(1001), 6, "bob"),
            Err(TransportError::ServerFull)
        ));

        assert!(manager.remove(id).is_some());
        assert!(manager.get_by_addr_mut(&addr(1000)).is_none());
    }
}
