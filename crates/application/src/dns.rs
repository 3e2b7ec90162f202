use std::sync::Arc;
use std::time::Duration;

use domain::common::entity::Protocol;
use domain::dns::parser;
use domain::packet::entity::UdpPacket;
use domain::policy::entity::{FlowAction, FlowPolicy, IpRule};
use domain::pucontext::context::PuContext;
use domain::tracker::cache::TimedCache;
use ports::secondary::metrics_port::MetricsPort;

use crate::registry::ContextRegistry;

/// Late-binds DNS name ACLs into concrete IP/port rules.
///
/// Requests cache the asking PU by source port; matching answers in the
/// response expand the PU's configured port list into accept rules on its
/// application ACLs. Runs inline on the datapath and never holds a DNS
/// packet back: every failure path is log-and-continue.
pub struct DnsObserver {
    sessions: TimedCache<u16, Arc<PuContext>>,
    max_sessions: usize,
    registry: Arc<ContextRegistry>,
    metrics: Arc<dyn MetricsPort>,
}

impl DnsObserver {
    pub fn new(
        registry: Arc<ContextRegistry>,
        metrics: Arc<dyn MetricsPort>,
        session_ttl: Duration,
        max_sessions: usize,
    ) -> Self {
        Self {
            sessions: TimedCache::new(session_ttl),
            max_sessions,
            registry,
            metrics,
        }
    }

    /// Remember which PU asked, keyed by the query's source port.
    pub fn observe_request(&self, packet: &UdpPacket) {
        if self.sessions.len() >= self.max_sessions && self.sessions.purge_expired() == 0 {
            tracing::debug!(port = packet.src_port, "dns session cache full, not tracking");
            return;
        }

        match self.registry.context_from_ip(packet.src_ip, packet.mark) {
            Ok(ctx) => self.sessions.add_or_update(packet.src_port, ctx),
            Err(_) => {
                tracing::debug!(src = %packet.src_ip, "dns request from unenforced process");
            }
        }
    }

    /// Expand matching A answers into application ACL rules for the PU
    /// that issued the query.
    pub fn observe_response(&self, packet: &UdpPacket) {
        let Some(ctx) = self.sessions.get_reset(&packet.dst_port) else {
            return;
        };
        if !ctx.has_dns_acls() {
            return;
        }

        let answers = match parser::parse_response_answers(&packet.payload) {
            Ok(answers) => answers,
            Err(err) => {
                tracing::debug!(error = %err, "undecodable dns response");
                return;
            }
        };

        for answer in answers {
            let Some(ports) = ctx.dns_ports_for(&answer.name) else {
                continue;
            };
            for port in ports.split(',') {
                let rule = IpRule {
                    address: answer.address.to_string(),
                    ports: port.trim().to_string(),
                    protocol: Protocol::Tcp,
                    policy: FlowPolicy::new(FlowAction::Accept, "default", "default"),
                };
                match ctx.add_dns_expanded_rule(&rule) {
                    Ok(()) => self.metrics.record_dns_expansion(),
                    Err(err) => {
                        self.metrics.record_dns_expansion_overflow();
                        tracing::debug!(
                            pu = ctx.management_id(),
                            name = answer.name,
                            error = %err,
                            "dns acl expansion skipped"
                        );
                    }
                }
            }
        }
    }

    /// Tracked request sessions (for tests and metrics).
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
