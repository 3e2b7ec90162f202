use domain::common::error::DomainError;
use domain::packet::entity::UdpPacket;

/// Raw-socket transmit abstraction.
///
/// Writes are non-blocking; implementations drop the packet and surface an
/// error on a full socket buffer. The datapath treats write failures as
/// degraded mode, never as flow failures.
pub trait PacketWriter: Send + Sync {
    fn write_packet(&self, packet: &UdpPacket) -> Result<(), DomainError>;
}
