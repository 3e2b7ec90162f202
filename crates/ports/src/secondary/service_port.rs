use domain::packet::entity::UdpPacket;
use domain::packet::marker::UdpPacketType;
use domain::pucontext::context::PuContext;

use super::token_port::ConnectionClaims;

/// Pre/post hooks for an optional service plane (payload encryption,
/// token decoration).
///
/// Pre-hooks run before a control packet is built and may mutate the
/// outgoing packet; post-hooks run after authorization decisions and may
/// transform payload. Returning `false` is a fatal per-packet drop.
///
/// All methods default to pass-through so implementations only override
/// the stages they participate in.
pub trait PacketService: Send + Sync {
    fn pre_process_app_packet(
        &self,
        _packet: &mut UdpPacket,
        _context: &PuContext,
        _packet_type: Option<UdpPacketType>,
    ) -> bool {
        true
    }

    fn post_process_app_packet(&self, _packet: &mut UdpPacket, _context: &PuContext) -> bool {
        true
    }

    fn pre_process_net_packet(&self, _packet: &mut UdpPacket, _context: &PuContext) -> bool {
        true
    }

    fn post_process_net_packet(
        &self,
        _packet: &mut UdpPacket,
        _claims: Option<&ConnectionClaims>,
        _context: &PuContext,
    ) -> bool {
        true
    }
}
