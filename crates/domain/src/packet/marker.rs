// UDP control packets carry a 20-byte signature at the start of the UDP
// payload:
//
//   byte 0   : bits 7-6 packet type (01=SYN, 10=SYNACK, 11=ACK),
//              bits 5-3 version, bits 2-0 reserved
//   byte 1   : reserved (0)
//   bytes 2-19: fixed ASCII signature
//   bytes 20+ : opaque token payload
//
// A payload is a control packet only when both the type bits and the full
// signature check out; anything else is application data.

/// Fixed 18-byte ASCII signature carried by every control packet.
pub const UDP_AUTH_MARKER: &[u8; 18] = b"n30njxq7bmiwr6dtxq";

/// Total length of the auth marker prefix.
pub const UDP_SIGNATURE_LEN: usize = 20;

pub const UDP_SYN_MASK: u8 = 0x40;
pub const UDP_SYN_ACK_MASK: u8 = 0x80;
pub const UDP_ACK_MASK: u8 = 0xC0;

const TYPE_MASK: u8 = 0xC0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpPacketType {
    Syn,
    SynAck,
    Ack,
}

impl UdpPacketType {
    pub fn mask(self) -> u8 {
        match self {
            Self::Syn => UDP_SYN_MASK,
            Self::SynAck => UDP_SYN_ACK_MASK,
            Self::Ack => UDP_ACK_MASK,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Syn => "syn",
            Self::SynAck => "synack",
            Self::Ack => "ack",
        }
    }
}

impl std::fmt::Display for UdpPacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the 20-byte auth marker for a control packet.
///
/// Version bits are currently always zero; receivers accept any version as
/// long as the signature matches.
pub fn create_auth_marker(packet_type: UdpPacketType) -> [u8; UDP_SIGNATURE_LEN] {
    let mut marker = [0u8; UDP_SIGNATURE_LEN];
    marker[0] = packet_type.mask();
    marker[2..].copy_from_slice(UDP_AUTH_MARKER);
    marker
}

/// Classify a UDP payload. Returns `None` for application data: payloads
/// that are too short, carry no valid type bits, or fail the signature
/// comparison.
pub fn packet_type(payload: &[u8]) -> Option<UdpPacketType> {
    if payload.len() < UDP_SIGNATURE_LEN {
        return None;
    }
    if &payload[2..UDP_SIGNATURE_LEN] != UDP_AUTH_MARKER {
        return None;
    }
    match payload[0] & TYPE_MASK {
        UDP_SYN_MASK => Some(UdpPacketType::Syn),
        UDP_SYN_ACK_MASK => Some(UdpPacketType::SynAck),
        UDP_ACK_MASK => Some(UdpPacketType::Ack),
        _ => None,
    }
}

/// The opaque token bytes following the marker.
pub fn token_payload(payload: &[u8]) -> &[u8] {
    payload.get(UDP_SIGNATURE_LEN..).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_layout() {
        let marker = create_auth_marker(UdpPacketType::Syn);
        assert_eq!(marker.len(), 20);
        assert_eq!(marker[0], 0x40);
        assert_eq!(marker[1], 0);
        assert_eq!(&marker[2..], UDP_AUTH_MARKER);
    }

    #[test]
    fn classify_all_types() {
        for t in [UdpPacketType::Syn, UdpPacketType::SynAck, UdpPacketType::Ack] {
            let marker = create_auth_marker(t);
            assert_eq!(packet_type(&marker), Some(t));
        }
    }

    #[test]
    fn classify_with_token_appended() {
        let mut payload = create_auth_marker(UdpPacketType::Ack).to_vec();
        payload.extend_from_slice(b"token-bytes");
        assert_eq!(packet_type(&payload), Some(UdpPacketType::Ack));
        assert_eq!(token_payload(&payload), b"token-bytes");
    }

    #[test]
    fn short_payload_is_data() {
        assert_eq!(packet_type(b"hello"), None);
        assert_eq!(packet_type(&[]), None);
    }

    #[test]
    fn zero_type_bits_is_data() {
        let mut marker = create_auth_marker(UdpPacketType::Syn);
        marker[0] = 0;
        assert_eq!(packet_type(&marker), None);
    }

    #[test]
    fn corrupted_signature_is_data() {
        let mut marker = create_auth_marker(UdpPacketType::Syn);
        marker[5] ^= 0xFF;
        assert_eq!(packet_type(&marker), None);
    }

    #[test]
    fn version_bits_are_ignored() {
        let mut marker = create_auth_marker(UdpPacketType::Syn);
        marker[0] |= 0b0010_1000; // version 5
        assert_eq!(packet_type(&marker), Some(UdpPacketType::Syn));
    }

    #[test]
    fn token_payload_of_bare_marker_is_empty() {
        let marker = create_auth_marker(UdpPacketType::Syn);
        assert!(token_payload(&marker).is_empty());
    }
}
