use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::TransportError;
use super::protocol::{MAX_PACKET_SIZE, Packet};
use super::stats::NetworkStats;

/// Nonblocking UDP socket speaking [`Packet`]s.
pub struct NetworkEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    stats: NetworkStats,
    recv_buffer: [u8; MAX_PACKET_SIZE],
}

impl NetworkEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            stats: NetworkStats::default(),
            recv_buffer: [0u8; MAX_PACKET_SIZE],
        })
    }

    pub fn bind_for(remote: SocketAddr) -> io::Result<Self> {
        if remote.is_ipv4() {
            Self::bind("0.0.0.0:0")
        } else {
            Self::bind("[::]:0")
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut NetworkStats {
        &mut self.stats
    }

    pub fn send_to(&mut self, packet: &Packet, addr: SocketAddr) -> Result<usize, TransportError> {
        let data = packet.serialize()?;

        if data.len() > MAX_PACKET_SIZE {
            return Err(TransportError::Oversize(data.len()));
        }

        let bytes = self.socket.send_to(&data, addr)?;

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;

        Ok(bytes)
    }

    /// Drains the socket. Undecodable or foreign packets are counted and
    /// dropped.
    pub fn receive(&mut self) -> io::Result<Vec<(Packet, SocketAddr)>> {
        let mut packets = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => match Packet::deserialize(&self.recv_buffer[..size]) {
                    Ok(packet) if packet.header.is_valid() => {
                        self.stats.packets_received += 1;
                        self.stats.bytes_received += size as u64;
                        packets.push((packet, addr));
                    }
                    Ok(_) => {
                        self.stats.packets_rejected += 1;
                        log::debug!("Dropping packet with foreign header from {}", addr);
                    }
                    Err(e) => {
                        self.stats.packets_rejected += 1;
                        log::warn!("Dropping undecodable packet from {}: {}", addr, e);
                    }
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // Windows reports ICMP port unreachable on the next receive.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(packets)
    }
}
