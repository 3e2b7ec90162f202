use std::net::Ipv4Addr;

use domain::common::error::DomainError;

/// Kernel conntrack handle: marks an authorized 5-tuple so subsequent
/// packets of the flow bypass the userspace path.
pub trait ConntrackPort: Send + Sync {
    fn update_mark(
        &self,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        protocol: u8,
        src_port: u16,
        dst_port: u16,
        mark: u32,
    ) -> Result<(), DomainError>;
}
