use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use domain::connection::entity::{ConnState, UdpConnection};
use domain::connection::error::TokenError;
use domain::packet::entity::{PacketDirection, UdpPacket};
use domain::packet::marker::UdpPacketType;
use domain::policy::entity::{FlowAction, FlowPolicy};
use domain::pucontext::context::PuContext;
use domain::report::entity::{DEFAULT_ENDPOINT, DropReason, FlowRecord};
use domain::tracker::tables::{ConnectionTracker, SharedConnection};
use ports::secondary::collector_port::CollectorPort;
use ports::secondary::conntrack_port::ConntrackPort;
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::packet_port::PacketWriter;
use ports::secondary::service_port::PacketService;
use ports::secondary::token_port::TokenAccessor;

use crate::dns::DnsObserver;
use crate::error::DatapathError;
use crate::registry::ContextRegistry;

/// Conntrack mark installed on authorized flows.
pub const DEFAULT_CONN_MARK: u32 = 0x1111;

/// Synthetic claim key carrying the destination port of an inbound SYN, so
/// selectors can be scoped to ports. The `@` prefix cannot collide with
/// real identity tags.
pub const PORT_LABEL: &str = "@port";

/// What the packet source should do with a processed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketVerdict {
    /// Forward to the application (inbound) or network (outbound).
    Deliver,
    /// Consume the packet: handshake traffic, queued payload, rejects.
    Drop,
}

#[derive(Debug, Clone)]
pub struct DatapathConfig {
    /// Require transmitter rules to match on SYNACK; when disabled a miss
    /// half-authenticates the flow.
    pub mutual_authorization: bool,
    /// TTL of connection-table entries without progress.
    pub connection_ttl: Duration,
    /// Per-connection payload queue bound; overflow drops the oldest.
    pub queue_limit: usize,
    /// Mark value installed into conntrack for authorized flows.
    pub conn_mark: u32,
    /// TTL of DNS request sessions awaiting a response.
    pub dns_session_ttl: Duration,
    /// Bound on concurrently tracked DNS request sessions.
    pub dns_max_sessions: usize,
    /// Per-PU bound on DNS-expanded ACL rules.
    pub dns_rule_limit: usize,
    /// Log every packet decision at debug level.
    pub packet_logs: bool,
}

impl Default for DatapathConfig {
    fn default() -> Self {
        Self {
            mutual_authorization: true,
            connection_ttl: Duration::from_secs(60),
            queue_limit: 64,
            conn_mark: DEFAULT_CONN_MARK,
            dns_session_ttl: Duration::from_secs(30),
            dns_max_sessions: 1024,
            dns_rule_limit: 4096,
            packet_logs: false,
        }
    }
}

/// The UDP authentication datapath.
///
/// Consumes packets from the abstract packet source in both directions,
/// drives the three-way in-band handshake, and authorizes flows against
/// the per-PU policy databases. Safe to share across worker threads; all
/// mutable state lives in the sharded connection tables and per-connection
/// locks.
pub struct Datapath {
    config: DatapathConfig,
    registry: Arc<ContextRegistry>,
    tracker: ConnectionTracker,
    dns: DnsObserver,
    token: Arc<dyn TokenAccessor>,
    conntrack: Arc<dyn ConntrackPort>,
    collector: Arc<dyn CollectorPort>,
    writer: Arc<dyn PacketWriter>,
    metrics: Arc<dyn MetricsPort>,
    service: Option<Arc<dyn PacketService>>,
}

impl Datapath {
    pub fn new(
        config: DatapathConfig,
        token: Arc<dyn TokenAccessor>,
        conntrack: Arc<dyn ConntrackPort>,
        collector: Arc<dyn CollectorPort>,
        writer: Arc<dyn PacketWriter>,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        let registry = Arc::new(ContextRegistry::new());
        let dns = DnsObserver::new(
            registry.clone(),
            metrics.clone(),
            config.dns_session_ttl,
            config.dns_max_sessions,
        );
        Self {
            tracker: ConnectionTracker::new(config.connection_ttl),
            registry,
            dns,
            config,
            token,
            conntrack,
            collector,
            writer,
            metrics,
            service: None,
        }
    }

    /// Attach a service plane (payload transform hooks).
    #[must_use]
    pub fn with_service(mut self, service: Arc<dyn PacketService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DatapathConfig {
        &self.config
    }

    /// Install or replace a PU's enforcement context.
    pub fn register_pu(&self, context: Arc<PuContext>, ips: &[Ipv4Addr]) {
        self.registry.register(context, ips);
    }

    /// Tear a PU down: drop its context and evict its connections.
    pub fn unregister_pu(&self, management_id: &str) -> Option<Arc<PuContext>> {
        let removed = self.registry.unregister(management_id);
        if removed.is_some() {
            let evicted = self.tracker.evict_context(management_id);
            tracing::debug!(pu = management_id, evicted, "evicted connections");
        }
        removed
    }

    /// Sweep expired connection-table entries.
    pub fn purge_expired(&self) -> usize {
        self.tracker.purge_expired()
    }

    // ── Egress: application packets ────────────────────────────────

    /// Process a packet leaving a local PU towards the network.
    pub fn process_application_udp_packet(
        &self,
        packet: &mut UdpPacket,
    ) -> Result<PacketVerdict, DatapathError> {
        if self.config.packet_logs {
            tracing::debug!(flow = %packet.flow_hash(), "processing application packet");
        }

        // DNS is observed for ACL expansion but never held back.
        if packet.dst_port == 53 {
            self.dns.observe_request(packet);
            return Ok(PacketVerdict::Deliver);
        }

        let shared = self.app_retrieve_state(packet)?;
        let mut conn = shared.lock().expect("connection lock poisoned");

        // Queue payload until the flow is authorized.
        if conn.state() != ConnState::AckProcessed
            && !packet.payload.is_empty()
            && conn.queue_packet(packet.clone()).is_some()
        {
            self.metrics.record_queue_drop();
        }

        match conn.state() {
            ConnState::SynStart => {
                self.process_app_syn(packet, &mut conn, &shared)?;
                // The original stays queued; its header-only clone went out.
                Ok(PacketVerdict::Drop)
            }
            ConnState::AckProcessed => {
                let context = conn.context().clone();
                if let Some(service) = &self.service
                    && !service.post_process_app_packet(packet, &context)
                {
                    return Err(DatapathError::ServiceReject);
                }
                Ok(PacketVerdict::Deliver)
            }
            _ => Ok(PacketVerdict::Drop),
        }
    }

    fn app_retrieve_state(&self, packet: &UdpPacket) -> Result<SharedConnection, DatapathError> {
        let hash = packet.flow_hash();
        if let Some(conn) = self.tracker.app_reply.get_reset(&hash) {
            return Ok(conn);
        }
        if let Some(conn) = self.tracker.app_orig.get_reset(&hash) {
            return Ok(conn);
        }

        let context = self.registry.context_from_ip(packet.src_ip, packet.mark)?;
        Ok(Arc::new(std::sync::Mutex::new(UdpConnection::new(
            context,
            self.config.queue_limit,
        ))))
    }

    /// First packet of an outbound flow: mint a SYN token and send it on a
    /// header-only clone of the packet.
    fn process_app_syn(
        &self,
        packet: &UdpPacket,
        conn: &mut UdpConnection,
        shared: &SharedConnection,
    ) -> Result<(), DatapathError> {
        let context = conn.context().clone();

        let mut syn_packet = packet.clone_headers();
        if let Some(service) = &self.service
            && !service.pre_process_app_packet(&mut syn_packet, &context, Some(UdpPacketType::Syn))
        {
            return Err(DatapathError::ServiceReject);
        }

        let token = self.token.create_syn_token(&context, &mut conn.auth)?;
        syn_packet.attach_token(UdpPacketType::Syn, &token);

        if let Some(service) = &self.service
            && !service.post_process_app_packet(&mut syn_packet, &context)
        {
            return Err(DatapathError::ServiceReject);
        }

        if let Err(err) = self.writer.write_packet(&syn_packet) {
            tracing::debug!(error = %err, "unable to send syn on raw socket");
        }

        conn.advance(ConnState::SynSend)?;

        self.tracker
            .app_orig
            .add_or_update(packet.flow_hash(), shared.clone());
        self.tracker.source_port.add_or_update(
            syn_packet.source_port_hash(PacketDirection::Application),
            shared.clone(),
        );
        self.tracker.nat.add_or_update(
            syn_packet.source_port_hash(PacketDirection::Application),
            syn_packet.source_port_hash(PacketDirection::Network),
        );
        Ok(())
    }

    // ── Ingress: network packets ───────────────────────────────────

    /// Process a packet arriving from the network for a local PU.
    pub fn process_network_udp_packet(
        &self,
        packet: &mut UdpPacket,
    ) -> Result<PacketVerdict, DatapathError> {
        if self.config.packet_logs {
            tracing::debug!(flow = %packet.flow_hash(), "processing network packet");
        }

        if packet.src_port == 53 {
            self.dns.observe_response(packet);
            return Ok(PacketVerdict::Deliver);
        }

        match packet.udp_type() {
            Some(UdpPacketType::Syn) => {
                let context = self
                    .registry
                    .context_from_ip(packet.dst_ip, packet.mark)
                    .map_err(|_| DatapathError::NoContext(packet.dst_ip.to_string()))?;
                let shared = Arc::new(std::sync::Mutex::new(UdpConnection::new(
                    context,
                    self.config.queue_limit,
                )));
                let mut conn = shared.lock().expect("connection lock poisoned");
                self.pre_net_hook(packet, &conn)?;
                self.process_net_syn(packet, &mut conn, &shared)?;
                // Handshake packets never reach the application.
                Ok(PacketVerdict::Drop)
            }
            Some(UdpPacketType::SynAck) => {
                let Some(shared) = self
                    .tracker
                    .source_port
                    .get_reset(&packet.source_port_hash(PacketDirection::Network))
                else {
                    // No SYN state for this SYNACK: ignore it.
                    tracing::debug!(flow = %packet.flow_hash(), "synack without syn state");
                    return Ok(PacketVerdict::Drop);
                };
                let mut conn = shared.lock().expect("connection lock poisoned");
                self.pre_net_hook(packet, &conn)?;
                match self.process_net_synack(packet, &mut conn, &shared) {
                    Ok(()) => Ok(PacketVerdict::Drop),
                    Err(err) => {
                        // The flow is dead; its queued payload goes with it.
                        conn.drop_queue();
                        Err(err)
                    }
                }
            }
            Some(UdpPacketType::Ack) => {
                let shared = self.net_retrieve_state(packet)?;
                let mut conn = shared.lock().expect("connection lock poisoned");
                self.pre_net_hook(packet, &conn)?;
                self.process_net_ack(packet, &mut conn)?;
                Ok(PacketVerdict::Drop)
            }
            None => {
                let shared = self.net_retrieve_state(packet)?;
                let mut conn = shared.lock().expect("connection lock poisoned");
                if conn.state() != ConnState::AckProcessed {
                    tracing::debug!(
                        flow = %packet.flow_hash(),
                        state = %conn.state(),
                        "data before authorization"
                    );
                    return Ok(PacketVerdict::Drop);
                }
                let context = conn.context().clone();
                drop(conn);
                if let Some(service) = &self.service {
                    if !service.post_process_net_packet(packet, None, &context) {
                        return Err(DatapathError::ServiceReject);
                    }
                }
                Ok(PacketVerdict::Deliver)
            }
        }
    }

    fn net_retrieve_state(&self, packet: &UdpPacket) -> Result<SharedConnection, DatapathError> {
        let hash = packet.flow_hash();
        self.tracker
            .net_reply
            .get_reset(&hash)
            .or_else(|| self.tracker.net_orig.get_reset(&hash))
            .ok_or(DatapathError::NoState)
    }

    fn pre_net_hook(
        &self,
        packet: &mut UdpPacket,
        conn: &UdpConnection,
    ) -> Result<(), DatapathError> {
        if let Some(service) = &self.service {
            if !service.pre_process_net_packet(packet, conn.context()) {
                return Err(DatapathError::ServiceReject);
            }
        }
        Ok(())
    }

    /// Inbound SYN: authenticate the peer and answer with a SYNACK.
    fn process_net_syn(
        &self,
        packet: &UdpPacket,
        conn: &mut UdpConnection,
        shared: &SharedConnection,
    ) -> Result<(), DatapathError> {
        let context = conn.context().clone();

        let mut claims = match self.token.parse_packet_token(&mut conn.auth, packet.read_token())
        {
            Ok(claims) if !claims.tags.is_empty() => claims,
            Ok(_) => {
                self.metrics.record_invalid_token("net");
                self.report_rejected(
                    packet,
                    DEFAULT_ENDPOINT,
                    context.management_id(),
                    DropReason::InvalidToken,
                    None,
                    None,
                );
                return Err(DatapathError::Token(TokenError::EmptyClaims));
            }
            Err(err) => {
                self.metrics.record_invalid_token("net");
                self.report_rejected(
                    packet,
                    DEFAULT_ENDPOINT,
                    context.management_id(),
                    DropReason::InvalidToken,
                    None,
                    None,
                );
                return Err(err.into());
            }
        };

        let tx_label = claims
            .transmitter_label()
            .unwrap_or(DEFAULT_ENDPOINT)
            .to_string();

        // Scope selectors to the destination port.
        claims
            .tags
            .append(PORT_LABEL, &packet.dst_port.to_string());

        let (report, pkt) = context.search_rcv_rules(&claims.tags);
        if pkt.action.rejected() {
            self.report_rejected(
                packet,
                &tx_label,
                context.management_id(),
                DropReason::PolicyDrop,
                Some(&report),
                Some(&pkt),
            );
            return Err(DatapathError::PolicyReject {
                policy_id: pkt.policy_id,
            });
        }

        conn.advance(ConnState::SynReceived)?;
        self.tracker
            .net_orig
            .add_or_update(packet.flow_hash(), shared.clone());
        self.tracker
            .app_reply
            .add_or_update(packet.reverse_flow_hash(), shared.clone());
        conn.report_flow_policy = Some(report);
        conn.packet_flow_policy = Some(pkt);

        if let Some(service) = &self.service {
            let mut packet = packet.clone();
            if !service.post_process_net_packet(&mut packet, Some(&claims), &context) {
                return Err(DatapathError::ServiceReject);
            }
        }

        self.send_synack(packet, &context, conn)
    }

    fn send_synack(
        &self,
        packet: &UdpPacket,
        context: &Arc<PuContext>,
        conn: &mut UdpConnection,
    ) -> Result<(), DatapathError> {
        let mut reply = packet.reverse_flow_packet(packet.src_ip, packet.src_port);

        if let Some(service) = &self.service {
            if !service.pre_process_app_packet(&mut reply, context, Some(UdpPacketType::SynAck)) {
                return Err(DatapathError::ServiceReject);
            }
        }

        let token = self.token.create_synack_token(context, &mut conn.auth)?;
        reply.attach_token(UdpPacketType::SynAck, &token);
        conn.advance(ConnState::SynAckSent)?;

        if let Some(service) = &self.service {
            if !service.post_process_app_packet(&mut reply, context) {
                return Err(DatapathError::ServiceReject);
            }
        }

        if let Err(err) = self.writer.write_packet(&reply) {
            tracing::debug!(error = %err, "unable to send synack on raw socket");
        }
        Ok(())
    }

    /// Inbound SYNACK at the initiator: authorize the responder, answer
    /// with an ACK, and release the flow.
    fn process_net_synack(
        &self,
        packet: &UdpPacket,
        conn: &mut UdpConnection,
        shared: &SharedConnection,
    ) -> Result<(), DatapathError> {
        let context = conn.context().clone();

        let claims = match self.token.parse_packet_token(&mut conn.auth, packet.read_token()) {
            Ok(claims) => claims,
            Err(err) => {
                self.metrics.record_invalid_token("net");
                self.report_rejected(
                    packet,
                    context.management_id(),
                    DEFAULT_ENDPOINT,
                    DropReason::MissingToken,
                    None,
                    None,
                );
                return Err(err.into());
            }
        };

        let (report, pkt) =
            context.search_txt_rules(&claims.tags, !self.config.mutual_authorization);
        if pkt.action.rejected() {
            self.report_rejected(
                packet,
                context.management_id(),
                &conn.auth.remote_context_id,
                DropReason::PolicyDrop,
                report.as_ref(),
                Some(&pkt),
            );
            return Err(DatapathError::PolicyReject {
                policy_id: pkt.policy_id,
            });
        }

        conn.advance(ConnState::SynAckReceived)?;
        self.tracker
            .net_reply
            .add_or_update(packet.flow_hash(), shared.clone());

        if let Some(service) = &self.service {
            let mut packet = packet.clone();
            if !service.post_process_net_packet(&mut packet, Some(&claims), &context) {
                return Err(DatapathError::ServiceReject);
            }
        }

        self.send_ack(packet, &context, conn)
    }

    fn send_ack(
        &self,
        packet: &UdpPacket,
        context: &Arc<PuContext>,
        conn: &mut UdpConnection,
    ) -> Result<(), DatapathError> {
        let token = self.token.create_ack_token(context, &mut conn.auth)?;

        // The SYNACK's source may have been rewritten by NAT; recover the
        // destination the application originally dialed.
        let endpoint = self
            .tracker
            .nat
            .get_reset(&packet.source_port_hash(PacketDirection::Network))
            .ok_or(DatapathError::NoState)?;
        let (dst_ip, dst_port) = parse_endpoint(&endpoint).ok_or_else(|| {
            DatapathError::Protocol(format!("bad endpoint in nat table: {endpoint}"))
        })?;

        let mut ack = packet.reverse_flow_packet(dst_ip, dst_port);
        ack.attach_token(UdpPacketType::Ack, &token);

        if let Err(err) = self.writer.write_packet(&ack) {
            tracing::debug!(error = %err, "unable to send ack on raw socket");
        }

        conn.advance(ConnState::AckProcessed)?;

        // Mark the flow before any queued payload leaves, so the kernel
        // short-circuits everything that follows.
        if !conn.service_connection {
            if let Err(err) = self.conntrack.update_mark(
                ack.src_ip,
                ack.dst_ip,
                17,
                ack.src_port,
                ack.dst_port,
                self.config.conn_mark,
            ) {
                tracing::error!(
                    flow = %ack.flow_hash(),
                    error = %err,
                    "conntrack update failed, flow stays in userspace"
                );
            }
        }

        self.metrics.record_flow("accept");

        for mut queued in conn.drain_queue() {
            if let Some(service) = &self.service {
                if !service.post_process_app_packet(&mut queued, context) {
                    return Err(DatapathError::ServiceReject);
                }
            }
            if let Err(err) = self.writer.write_packet(&queued) {
                tracing::error!(error = %err, "unable to transmit queued packet");
            }
        }
        Ok(())
    }

    /// Inbound ACK at the responder: verify liveness and release the flow.
    fn process_net_ack(
        &self,
        packet: &UdpPacket,
        conn: &mut UdpConnection,
    ) -> Result<(), DatapathError> {
        let context = conn.context().clone();

        if let Err(err) = self.token.parse_ack_token(&mut conn.auth, packet.read_token()) {
            self.metrics.record_invalid_token("net");
            let remote = conn.auth.remote_context_id.clone();
            self.report_rejected(
                packet,
                &remote,
                context.management_id(),
                DropReason::PolicyDrop,
                conn.report_flow_policy.as_ref(),
                conn.packet_flow_policy.as_ref(),
            );
            return Err(err.into());
        }

        conn.advance(ConnState::AckReceived)?;

        if !conn.service_connection {
            if let Err(err) = self.conntrack.update_mark(
                packet.dst_ip,
                packet.src_ip,
                17,
                packet.dst_port,
                packet.src_port,
                self.config.conn_mark,
            ) {
                tracing::error!(
                    flow = %packet.flow_hash(),
                    error = %err,
                    "conntrack update failed, flow stays in userspace"
                );
            }
        }

        self.report_accepted(packet, conn);
        self.metrics.record_flow("accept");

        conn.advance(ConnState::AckProcessed)?;
        Ok(())
    }

    // ── Reports ────────────────────────────────────────────────────

    fn report_rejected(
        &self,
        packet: &UdpPacket,
        source_id: &str,
        destination_id: &str,
        reason: DropReason,
        report: Option<&FlowPolicy>,
        pkt: Option<&FlowPolicy>,
    ) {
        self.metrics.record_flow("reject");
        self.collector.collect_flow_event(FlowRecord {
            source_id: source_id.to_string(),
            destination_id: destination_id.to_string(),
            source_ip: packet.src_ip,
            destination_ip: packet.dst_ip,
            destination_port: packet.dst_port,
            action: FlowAction::Reject,
            drop_reason: Some(reason),
            policy_id: pkt
                .map_or_else(|| "default".to_string(), |p| p.policy_id.clone()),
            observed_policy_id: report.map(|p| p.policy_id.clone()),
            count: 1,
        });
    }

    fn report_accepted(&self, packet: &UdpPacket, conn: &UdpConnection) {
        let pkt = conn.packet_flow_policy.clone().unwrap_or_default();
        self.collector.collect_flow_event(FlowRecord {
            source_id: conn.auth.remote_context_id.clone(),
            destination_id: conn.context().management_id().to_string(),
            source_ip: packet.src_ip,
            destination_ip: packet.dst_ip,
            destination_port: packet.dst_port,
            action: FlowAction::Accept,
            drop_reason: None,
            policy_id: pkt.policy_id,
            observed_policy_id: conn
                .report_flow_policy
                .as_ref()
                .map(|p| p.policy_id.clone()),
            count: 1,
        });
    }
}

fn parse_endpoint(endpoint: &str) -> Option<(Ipv4Addr, u16)> {
    let (ip, port) = endpoint.rsplit_once(':')?;
    Some((ip.parse().ok()?, port.parse().ok()?))
}
