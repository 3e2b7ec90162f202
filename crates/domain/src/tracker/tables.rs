use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::connection::entity::UdpConnection;
use crate::packet::entity::FlowHash;

use super::cache::TimedCache;

/// Connections are shared between tables and with in-flight packet
/// processing.
pub type SharedConnection = Arc<Mutex<UdpConnection>>;

/// The keyed connection tables of the UDP datapath.
///
/// Initiator side: `app_orig` (forward hash, written at SYN send) and
/// `net_reply` (forward hash of arriving packets, written at SYNACK).
/// Responder side: `net_orig` (forward hash, written at SYN receive) and
/// `app_reply` (reverse hash, for outbound replies). `source_port` lets a
/// SYNACK find the initiator connection across NAT; `nat` maps the
/// initiator's original endpoint pair so the ACK can be addressed to the
/// pre-NAT destination.
pub struct ConnectionTracker {
    pub app_orig: TimedCache<FlowHash, SharedConnection>,
    pub app_reply: TimedCache<FlowHash, SharedConnection>,
    pub net_orig: TimedCache<FlowHash, SharedConnection>,
    pub net_reply: TimedCache<FlowHash, SharedConnection>,
    pub source_port: TimedCache<String, SharedConnection>,
    pub nat: TimedCache<String, String>,
}

impl ConnectionTracker {
    /// All tables share one TTL; entries are refreshed on access so only
    /// stalled flows expire.
    pub fn new(ttl: Duration) -> Self {
        Self {
            app_orig: TimedCache::new(ttl),
            app_reply: TimedCache::new(ttl),
            net_orig: TimedCache::new(ttl),
            net_reply: TimedCache::new(ttl),
            source_port: TimedCache::new(ttl),
            nat: TimedCache::new(ttl),
        }
    }

    /// Drop every connection belonging to the given processing unit.
    /// Used at unenforce; the NAT table holds no context and ages out on
    /// its own.
    pub fn evict_context(&self, management_id: &str) -> usize {
        let matches = |conn: &SharedConnection| {
            conn.lock()
                .expect("connection lock poisoned")
                .context()
                .management_id()
                == management_id
        };
        self.app_orig.retain(|_, c| !matches(c))
            + self.app_reply.retain(|_, c| !matches(c))
            + self.net_orig.retain(|_, c| !matches(c))
            + self.net_reply.retain(|_, c| !matches(c))
            + self.source_port.retain(|_, c| !matches(c))
    }

    /// Sweep expired entries from every table.
    pub fn purge_expired(&self) -> usize {
        self.app_orig.purge_expired()
            + self.app_reply.purge_expired()
            + self.net_orig.purge_expired()
            + self.net_reply.purge_expired()
            + self.source_port.purge_expired()
            + self.nat.purge_expired()
    }
}
