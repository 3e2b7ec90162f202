use std::net::Ipv4Addr;

use crate::common::entity::Protocol;

use super::marker::{self, UdpPacketType};

/// Direction a packet was captured in: leaving a local processing unit
/// (application) or arriving from the wire (network).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Application,
    Network,
}

/// Stable 32-byte canonical flow key.
///
/// Layout: src(4) dst(4) sport(2) dport(2) proto(1), zero padded. The
/// layout is part of the external interface and must not change across
/// versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowHash([u8; 32]);

impl FlowHash {
    pub fn new(
        src_ip: Ipv4Addr,
        src_port: u16,
        dst_ip: Ipv4Addr,
        dst_port: u16,
        protocol: Protocol,
    ) -> Self {
        let mut key = [0u8; 32];
        key[0..4].copy_from_slice(&src_ip.octets());
        key[4..8].copy_from_slice(&dst_ip.octets());
        key[8..10].copy_from_slice(&src_port.to_be_bytes());
        key[10..12].copy_from_slice(&dst_port.to_be_bytes());
        key[12] = protocol.to_u8();
        Self(key)
    }

    pub fn canonical(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for FlowHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let k = &self.0;
        write!(
            f,
            "{}.{}.{}.{}:{}->{}.{}.{}.{}:{}/{}",
            k[0],
            k[1],
            k[2],
            k[3],
            u16::from_be_bytes([k[8], k[9]]),
            k[4],
            k[5],
            k[6],
            k[7],
            u16::from_be_bytes([k[10], k[11]]),
            k[12],
        )
    }
}

/// An in-flight UDP datagram, abstracted away from the capture mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpPacket {
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
    /// Socket mark the packet was captured with (0 when unknown).
    pub mark: u32,
    pub payload: Vec<u8>,
}

impl UdpPacket {
    pub fn new(
        src_ip: Ipv4Addr,
        src_port: u16,
        dst_ip: Ipv4Addr,
        dst_port: u16,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            src_ip,
            src_port,
            dst_ip,
            dst_port,
            mark: 0,
            payload,
        }
    }

    /// Forward flow key.
    pub fn flow_hash(&self) -> FlowHash {
        FlowHash::new(
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
            Protocol::Udp,
        )
    }

    /// Flow key of the reply direction.
    pub fn reverse_flow_hash(&self) -> FlowHash {
        FlowHash::new(
            self.dst_ip,
            self.dst_port,
            self.src_ip,
            self.src_port,
            Protocol::Udp,
        )
    }

    /// Endpoint key of the local side for the given capture direction:
    /// the source endpoint for application packets, the destination
    /// endpoint for network packets.
    pub fn source_port_hash(&self, direction: PacketDirection) -> String {
        match direction {
            PacketDirection::Application => format!("{}:{}", self.src_ip, self.src_port),
            PacketDirection::Network => format!("{}:{}", self.dst_ip, self.dst_port),
        }
    }

    /// Header-only copy, preserving the original payload on `self` so it
    /// can be queued and retransmitted after authorization.
    pub fn clone_headers(&self) -> Self {
        Self {
            payload: Vec::new(),
            ..*self
        }
    }

    /// Build the reply packet for this one, addressed to the given
    /// destination (which may differ from our source when NAT rewrote it).
    pub fn reverse_flow_packet(&self, dst_ip: Ipv4Addr, dst_port: u16) -> Self {
        Self {
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip,
            dst_port,
            mark: self.mark,
            payload: Vec::new(),
        }
    }

    /// Replace the payload with an auth marker followed by a token.
    pub fn attach_token(&mut self, packet_type: UdpPacketType, token: &[u8]) {
        let marker = marker::create_auth_marker(packet_type);
        let mut payload = Vec::with_capacity(marker.len() + token.len());
        payload.extend_from_slice(&marker);
        payload.extend_from_slice(token);
        self.payload = payload;
    }

    /// Classify the payload by its auth marker. `None` means data.
    pub fn udp_type(&self) -> Option<UdpPacketType> {
        marker::packet_type(&self.payload)
    }

    /// Token bytes following the auth marker.
    pub fn read_token(&self) -> &[u8] {
        marker::token_payload(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet() -> UdpPacket {
        UdpPacket::new(
            "10.0.0.1".parse().unwrap(),
            40000,
            "10.0.0.2".parse().unwrap(),
            9000,
            b"data".to_vec(),
        )
    }

    #[test]
    fn flow_hash_is_stable() {
        let p = packet();
        assert_eq!(p.flow_hash(), p.flow_hash());
        let key = p.flow_hash();
        assert_eq!(&key.canonical()[0..4], &[10, 0, 0, 1]);
        assert_eq!(&key.canonical()[4..8], &[10, 0, 0, 2]);
        assert_eq!(key.canonical()[12], 17);
        assert!(key.canonical()[13..].iter().all(|&b| b == 0));
    }

    #[test]
    fn reverse_hash_matches_reply_packet() {
        let p = packet();
        let reply = UdpPacket::new(p.dst_ip, p.dst_port, p.src_ip, p.src_port, Vec::new());
        assert_eq!(p.reverse_flow_hash(), reply.flow_hash());
        assert_ne!(p.flow_hash(), p.reverse_flow_hash());
    }

    #[test]
    fn source_port_hash_by_direction() {
        let p = packet();
        assert_eq!(
            p.source_port_hash(PacketDirection::Application),
            "10.0.0.1:40000"
        );
        assert_eq!(p.source_port_hash(PacketDirection::Network), "10.0.0.2:9000");
    }

    #[test]
    fn clone_headers_drops_payload_only() {
        let p = packet();
        let clone = p.clone_headers();
        assert!(clone.payload.is_empty());
        assert_eq!(clone.src_ip, p.src_ip);
        assert_eq!(clone.dst_port, p.dst_port);
        assert_eq!(p.payload, b"data");
    }

    #[test]
    fn reverse_flow_packet_swaps_endpoints() {
        let p = packet();
        let reply = p.reverse_flow_packet("10.0.0.9".parse().unwrap(), 4242);
        assert_eq!(reply.src_ip, p.dst_ip);
        assert_eq!(reply.src_port, p.dst_port);
        assert_eq!(reply.dst_ip, "10.0.0.9".parse::<Ipv4Addr>().unwrap());
        assert_eq!(reply.dst_port, 4242);
        assert!(reply.payload.is_empty());
    }

    #[test]
    fn attach_token_then_classify() {
        let mut p = packet().clone_headers();
        p.attach_token(UdpPacketType::Syn, b"jwt");
        assert_eq!(p.udp_type(), Some(UdpPacketType::Syn));
        assert_eq!(p.read_token(), b"jwt");
    }

    #[test]
    fn data_payload_classifies_as_none() {
        assert_eq!(packet().udp_type(), None);
    }

    #[test]
    fn flow_hash_display_is_readable() {
        let p = packet();
        assert_eq!(format!("{}", p.flow_hash()), "10.0.0.1:40000->10.0.0.2:9000/17");
    }
}
