use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::connection::{ConnectionManager, ConnectionState, PeerChannel};
use super::endpoint::NetworkEndpoint;
use super::protocol::{Packet, PacketType};
use super::stats::{NetworkStats, random_salt};
use super::{Inbound, Target, Transport, TransportError};
use crate::message::Message;
use crate::types::{ClientId, Peer};

const HANDSHAKE_RESEND: Duration = Duration::from_millis(100);
const HANDSHAKE_POLL: Duration = Duration::from_millis(5);
const PING_INTERVAL: Duration = Duration::from_secs(1);

fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Server side of the UDP transport: salted handshake, then one
/// [`PeerChannel`] per connected client.
pub struct UdpServerTransport {
    endpoint: NetworkEndpoint,
    connections: ConnectionManager,
    events: Vec<Inbound>,
    open: bool,
}

impl UdpServerTransport {
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        max_clients: usize,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let endpoint = NetworkEndpoint::bind(addr)?;
        log::info!("Listening on {}", endpoint.local_addr());

        Ok(Self {
            endpoint,
            connections: ConnectionManager::with_timeout(max_clients, timeout),
            events: Vec::new(),
            open: true,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn stats(&self) -> &NetworkStats {
        self.endpoint.stats()
    }

    pub fn connected_count(&self) -> usize {
        self.connections.connected_count()
    }

    fn send_control(&mut self, payload: PacketType, addr: SocketAddr) {
        if let Err(e) = self.endpoint.send_to(&Packet::control(payload), addr) {
            log::warn!("Failed to send control packet to {}: {}", addr, e);
        }
    }

    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet.payload {
            PacketType::ConnectionRequest { client_salt, name } => {
                self.handle_connection_request(addr, client_salt, &name);
            }
            PacketType::ChallengeResponse { combined_salt } => {
                self.handle_challenge_response(addr, combined_salt);
            }
            PacketType::Payload(payload) => {
                let Some(conn) = self.connections.get_by_addr_mut(&addr) else {
                    return;
                };
                if !conn.is_connected() {
                    return;
                }
                let from = Peer::Client(conn.client_id);
                for message in conn.channel.receive(&packet.header, payload) {
                    self.events.push(Inbound::Message { from, message });
                }
            }
            PacketType::Ping { timestamp } => {
                self.send_control(PacketType::Pong { timestamp }, addr);
            }
            PacketType::Disconnect => {
                if let Some(conn) = self.connections.remove_by_addr(&addr) {
                    log::info!("Client {} ({}) disconnected", conn.client_id, conn.name);
                    if conn.is_connected() {
                        self.events.push(Inbound::Disconnected {
                            client: conn.client_id,
                        });
                    }
                }
                return;
            }
            PacketType::ConnectionChallenge { .. }
            | PacketType::ConnectionAccepted { .. }
            | PacketType::ConnectionDenied { .. }
            | PacketType::Pong { .. } => {}
        }

        if let Some(conn) = self.connections.get_by_addr_mut(&addr) {
            conn.touch();
        }
    }

    fn handle_connection_request(&mut self, addr: SocketAddr, client_salt: u64, name: &str) {
        let reply = match self
            .connections
            .get_or_create_pending(addr, client_salt, name)
        {
            Ok(conn) if conn.is_connected() => PacketType::ConnectionAccepted {
                client_id: conn.client_id,
            },
            Ok(conn) => PacketType::ConnectionChallenge {
                server_salt: conn.server_salt,
            },
            Err(e) => {
                log::info!("Denying {} ({}): {}", addr, name, e);
                PacketType::ConnectionDenied {
                    reason: e.to_string(),
                }
            }
        };
        self.send_control(reply, addr);
    }

    fn handle_challenge_response(&mut self, addr: SocketAddr, combined_salt: u64) {
        let Some(conn) = self.connections.get_by_addr_mut(&addr) else {
            return;
        };

        if combined_salt != conn.combined_salt() {
            log::warn!("Invalid challenge response from {}", addr);
            return;
        }

        let client_id = conn.client_id;
        if !conn.is_connected() {
            conn.state = ConnectionState::Connected;
            log::info!("Client {} ({}) connected from {}", client_id, conn.name, addr);
            self.events.push(Inbound::Connected {
                client: client_id,
                name: conn.name.clone(),
            });
        }
        self.send_control(PacketType::ConnectionAccepted { client_id }, addr);
    }

    fn queue_for(
        &mut self,
        client: ClientId,
        message: &Message,
        reliable: bool,
    ) -> Result<(), TransportError> {
        match self.connections.get_mut(client) {
            Some(conn) if conn.is_connected() => conn.channel.queue(message.clone(), reliable),
            _ => Err(TransportError::UnknownClient(client)),
        }
    }
}

impl Transport for UdpServerTransport {
    fn send(
        &mut self,
        target: Target,
        message: &Message,
        reliable: bool,
    ) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        match target {
            Target::Client(client) => self.queue_for(client, message, reliable),
            Target::AllClients | Target::AllClientsExcept(_) => {
                for conn in self.connections.iter_mut() {
                    if !conn.is_connected() || target == Target::AllClientsExcept(conn.client_id) {
                        continue;
                    }
                    conn.channel.queue(message.clone(), reliable)?;
                }
                Ok(())
            }
            Target::Server => Err(TransportError::InvalidTarget(target)),
        }
    }

    fn broadcast(&mut self, message: &Message, reliable: bool) -> Result<(), TransportError> {
        self.send(Target::AllClients, message, reliable)
    }

    fn poll(&mut self) -> Result<Vec<Inbound>, TransportError> {
        if !self.open {
            return Ok(Vec::new());
        }

        for (packet, addr) in self.endpoint.receive()? {
            self.handle_packet(packet, addr);
        }

        for conn in self.connections.cleanup_timed_out() {
            log::info!("Client {} ({}) timed out", conn.client_id, conn.name);
            if conn.is_connected() {
                self.events.push(Inbound::Disconnected {
                    client: conn.client_id,
                });
            }
        }

        Ok(std::mem::take(&mut self.events))
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let now = Instant::now();
        let mut lost = 0;
        for conn in self.connections.iter_mut().filter(|c| c.is_connected()) {
            for packet in conn.channel.outgoing(now) {
                if let Err(e) = self.endpoint.send_to(&packet, conn.addr) {
                    log::warn!("Failed to send to client {}: {}", conn.client_id, e);
                }
            }
            lost += conn.channel.lost_packets();
        }
        self.endpoint.stats_mut().packets_lost = lost;
        Ok(())
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        let _ = self.flush();
        let addrs: Vec<SocketAddr> = self
            .connections
            .iter()
            .filter(|c| c.is_connected())
            .map(|c| c.addr)
            .collect();
        for addr in addrs {
            self.send_control(PacketType::Disconnect, addr);
        }
        self.open = false;
        log::info!("Server transport closed");
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Client side of the UDP transport. [`UdpClientTransport::connect`]
/// completes the handshake before returning.
pub struct UdpClientTransport {
    endpoint: NetworkEndpoint,
    server_addr: SocketAddr,
    client_id: ClientId,
    channel: PeerChannel,
    timeout: Duration,
    last_receive: Instant,
    last_ping: Instant,
    open: bool,
    backlog: Vec<Inbound>,
}

impl UdpClientTransport {
    pub fn connect(
        server_addr: SocketAddr,
        name: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut endpoint = NetworkEndpoint::bind_for(server_addr)?;
        let client_salt = random_salt();
        let mut state = ConnectionState::Connecting;
        let mut combined_salt = 0;
        let start = Instant::now();
        let mut last_send: Option<Instant> = None;

        log::info!("Connecting to {} as '{}'", server_addr, name);

        loop {
            if start.elapsed() > timeout {
                log::warn!("Connection to {} timed out", server_addr);
                return Err(TransportError::Timeout);
            }

            if last_send.is_none_or(|t| t.elapsed() >= HANDSHAKE_RESEND) {
                let payload = match state {
                    ConnectionState::ChallengeResponse => {
                        PacketType::ChallengeResponse { combined_salt }
                    }
                    _ => PacketType::ConnectionRequest {
                        client_salt,
                        name: name.to_string(),
                    },
                };
                endpoint.send_to(&Packet::control(payload), server_addr)?;
                last_send = Some(Instant::now());
            }

            let mut packets = endpoint.receive()?.into_iter();
            while let Some((packet, addr)) = packets.next() {
                if addr != server_addr {
                    continue;
                }
                match packet.payload {
                    PacketType::ConnectionChallenge { server_salt } => {
                        log::debug!("Received challenge from server");
                        state = ConnectionState::ChallengeResponse;
                        combined_salt = client_salt ^ server_salt;
                        last_send = None;
                    }
                    PacketType::ConnectionAccepted { client_id } => {
                        log::info!("Connected to server with client ID {}", client_id);
                        let mut transport = Self {
                            endpoint,
                            server_addr,
                            client_id,
                            channel: PeerChannel::new(),
                            timeout,
                            last_receive: Instant::now(),
                            last_ping: Instant::now(),
                            open: true,
                            backlog: Vec::new(),
                        };
                        for (packet, addr) in packets {
                            let events = transport.handle_packet(packet, addr);
                            transport.backlog.extend(events);
                        }
                        return Ok(transport);
                    }
                    PacketType::ConnectionDenied { reason } => {
                        log::warn!("Connection denied: {}", reason);
                        return Err(TransportError::Denied(reason));
                    }
                    _ => {}
                }
            }

            thread::sleep(HANDSHAKE_POLL);
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        self.endpoint.stats()
    }

    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) -> Vec<Inbound> {
        if addr != self.server_addr {
            return Vec::new();
        }
        self.last_receive = Instant::now();

        match packet.payload {
            PacketType::Payload(payload) => self
                .channel
                .receive(&packet.header, payload)
                .into_iter()
                .map(|message| Inbound::Message {
                    from: Peer::Server,
                    message,
                })
                .collect(),
            PacketType::Pong { timestamp } => {
                let rtt = timestamp_ms().saturating_sub(timestamp);
                self.endpoint.stats_mut().rtt_ms = rtt as f32;
                Vec::new()
            }
            PacketType::Disconnect => {
                log::info!("Disconnected by server");
                self.open = false;
                vec![Inbound::Disconnected {
                    client: self.client_id,
                }]
            }
            _ => Vec::new(),
        }
    }
}

impl Transport for UdpClientTransport {
    fn send(
        &mut self,
        target: Target,
        message: &Message,
        reliable: bool,
    ) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        match target {
            Target::Server => self.channel.queue(message.clone(), reliable),
            other => Err(TransportError::InvalidTarget(other)),
        }
    }

    fn broadcast(&mut self, message: &Message, reliable: bool) -> Result<(), TransportError> {
        self.send(Target::Server, message, reliable)
    }

    fn poll(&mut self) -> Result<Vec<Inbound>, TransportError> {
        if !self.open {
            return Ok(Vec::new());
        }

        let mut events = std::mem::take(&mut self.backlog);
        for (packet, addr) in self.endpoint.receive()? {
            events.extend(self.handle_packet(packet, addr));
            if !self.open {
                return Ok(events);
            }
        }

        if self.last_receive.elapsed() > self.timeout {
            log::warn!("Server connection lost");
            self.open = false;
            events.push(Inbound::Disconnected {
                client: self.client_id,
            });
        }

        Ok(events)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }

        let now = Instant::now();
        if now.duration_since(self.last_ping) >= PING_INTERVAL {
            let ping = Packet::control(PacketType::Ping {
                timestamp: timestamp_ms(),
            });
            self.endpoint.send_to(&ping, self.server_addr)?;
            self.last_ping = now;
        }

        for packet in self.channel.outgoing(now) {
            self.endpoint.send_to(&packet, self.server_addr)?;
        }
        self.endpoint.stats_mut().packets_lost = self.channel.lost_packets();
        Ok(())
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        let _ = self.flush();
        let addr = self.server_addr;
        if let Err(e) = self
            .endpoint
            .send_to(&Packet::control(PacketType::Disconnect), addr)
        {
            log::warn!("Failed to send disconnect: {}", e);
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for UdpClientTransport {
    fn drop(&mut self) {
        self.close();
    }
}
