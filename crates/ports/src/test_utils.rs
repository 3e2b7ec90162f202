use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use domain::common::error::DomainError;
use domain::connection::entity::AuthInfo;
use domain::connection::error::TokenError;
use domain::packet::entity::UdpPacket;
use domain::policy::tags::TagStore;
use domain::pucontext::context::PuContext;
use domain::report::entity::{ContainerRecord, FlowRecord};

use crate::secondary::collector_port::CollectorPort;
use crate::secondary::conntrack_port::ConntrackPort;
use crate::secondary::metrics_port::{ControlMetrics, DatapathMetrics};
use crate::secondary::packet_port::PacketWriter;
use crate::secondary::token_port::{ConnectionClaims, TRANSMITTER_LABEL, TokenAccessor};

// ── Metrics ────────────────────────────────────────────────────────

/// No-op implementation of all metrics sub-traits for use in tests.
pub struct NoopMetrics;

impl DatapathMetrics for NoopMetrics {}
impl ControlMetrics for NoopMetrics {}

// ── Collector ──────────────────────────────────────────────────────

/// In-memory collector that aggregates flow records by stats hash,
/// summing counts (a zero count stands for one flow).
#[derive(Default)]
pub struct MemoryCollector {
    flows: Mutex<HashMap<String, FlowRecord>>,
    containers: Mutex<Vec<ContainerRecord>>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flows(&self) -> Vec<FlowRecord> {
        self.flows
            .lock()
            .expect("collector lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn containers(&self) -> Vec<ContainerRecord> {
        self.containers
            .lock()
            .expect("collector lock poisoned")
            .clone()
    }
}

impl CollectorPort for MemoryCollector {
    fn collect_flow_event(&self, mut record: FlowRecord) {
        if record.count == 0 {
            record.count = 1;
        }
        let mut flows = self.flows.lock().expect("collector lock poisoned");
        match flows.get_mut(&record.stats_hash()) {
            Some(existing) => existing.count += record.count,
            None => {
                flows.insert(record.stats_hash(), record);
            }
        }
    }

    fn collect_container_event(&self, record: ContainerRecord) {
        self.containers
            .lock()
            .expect("collector lock poisoned")
            .push(record);
    }
}

// ── Conntrack ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConntrackUpdate {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub mark: u32,
}

/// Records every mark installation for assertions.
#[derive(Default)]
pub struct RecordingConntrack {
    updates: Mutex<Vec<ConntrackUpdate>>,
}

impl RecordingConntrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<ConntrackUpdate> {
        self.updates.lock().expect("conntrack lock poisoned").clone()
    }
}

impl ConntrackPort for RecordingConntrack {
    fn update_mark(
        &self,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        protocol: u8,
        src_port: u16,
        dst_port: u16,
        mark: u32,
    ) -> Result<(), DomainError> {
        self.updates
            .lock()
            .expect("conntrack lock poisoned")
            .push(ConntrackUpdate {
                src_ip,
                dst_ip,
                protocol,
                src_port,
                dst_port,
                mark,
            });
        Ok(())
    }
}

/// Conntrack handle that always fails, for degraded-mode tests.
pub struct FailingConntrack;

impl ConntrackPort for FailingConntrack {
    fn update_mark(
        &self,
        _src_ip: Ipv4Addr,
        _dst_ip: Ipv4Addr,
        _protocol: u8,
        _src_port: u16,
        _dst_port: u16,
        _mark: u32,
    ) -> Result<(), DomainError> {
        Err(DomainError::EngineError("conntrack unavailable".to_string()))
    }
}

// ── Packet writer ──────────────────────────────────────────────────

/// Captures transmitted packets for assertions.
#[derive(Default)]
pub struct MemoryWriter {
    sent: Mutex<Vec<UdpPacket>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<UdpPacket> {
        self.sent.lock().expect("writer lock poisoned").clone()
    }
}

impl PacketWriter for MemoryWriter {
    fn write_packet(&self, packet: &UdpPacket) -> Result<(), DomainError> {
        self.sent
            .lock()
            .expect("writer lock poisoned")
            .push(packet.clone());
        Ok(())
    }
}

// ── Token accessor ─────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct TokenPayload {
    id: String,
    nonce: String,
    tags: Vec<String>,
}

/// Unsigned JSON token accessor for tests.
///
/// Tokens carry the context ID, a per-context nonce, and the identity
/// claims; the ACK "signature" is the concatenation of both nonces, which
/// gives the same failure modes as the real signed path (garbage fails to
/// parse, a wrong nonce fails verification) without any key material.
#[derive(Default)]
pub struct JsonTokenAccessor {
    empty_claims: bool,
}

impl JsonTokenAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint tokens with no claims, to exercise the empty-claims reject
    /// path.
    pub fn with_empty_claims() -> Self {
        Self { empty_claims: true }
    }

    fn create_token(
        &self,
        context: &PuContext,
        auth: &mut AuthInfo,
    ) -> Result<Vec<u8>, TokenError> {
        auth.local_context_id = context.management_id().to_string();
        auth.local_nonce = format!("nonce-{}", context.management_id()).into_bytes();

        let mut tags = if self.empty_claims {
            Vec::new()
        } else {
            context.identity().to_slice()
        };
        if !self.empty_claims {
            tags.push(format!("{TRANSMITTER_LABEL}={}", context.management_id()));
        }

        let payload = TokenPayload {
            id: context.management_id().to_string(),
            nonce: String::from_utf8_lossy(&auth.local_nonce).to_string(),
            tags,
        };
        serde_json::to_vec(&payload).map_err(|e| TokenError::Invalid(e.to_string()))
    }
}

impl TokenAccessor for JsonTokenAccessor {
    fn create_syn_token(
        &self,
        context: &PuContext,
        auth: &mut AuthInfo,
    ) -> Result<Vec<u8>, TokenError> {
        self.create_token(context, auth)
    }

    fn create_synack_token(
        &self,
        context: &PuContext,
        auth: &mut AuthInfo,
    ) -> Result<Vec<u8>, TokenError> {
        self.create_token(context, auth)
    }

    fn create_ack_token(
        &self,
        context: &PuContext,
        auth: &mut AuthInfo,
    ) -> Result<Vec<u8>, TokenError> {
        auth.local_context_id = context.management_id().to_string();
        let mut token = b"ack|".to_vec();
        token.extend_from_slice(&auth.local_nonce);
        token.push(b'|');
        token.extend_from_slice(&auth.remote_nonce);
        Ok(token)
    }

    fn parse_packet_token(
        &self,
        auth: &mut AuthInfo,
        data: &[u8],
    ) -> Result<ConnectionClaims, TokenError> {
        let payload: TokenPayload =
            serde_json::from_slice(data).map_err(|e| TokenError::Invalid(e.to_string()))?;
        auth.remote_context_id = payload.id;
        auth.remote_nonce = payload.nonce.into_bytes();
        Ok(ConnectionClaims {
            tags: TagStore::from_slice(&payload.tags),
        })
    }

    fn parse_ack_token(&self, auth: &mut AuthInfo, data: &[u8]) -> Result<(), TokenError> {
        // The sender signed (its local, its remote) = (our remote, our local).
        let mut expected = b"ack|".to_vec();
        expected.extend_from_slice(&auth.remote_nonce);
        expected.push(b'|');
        expected.extend_from_slice(&auth.local_nonce);
        if data == expected.as_slice() {
            Ok(())
        } else {
            Err(TokenError::Signature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::policy::entity::FlowAction;
    use domain::pucontext::context::PuPolicy;

    fn flow_record(policy_id: &str, count: u64) -> FlowRecord {
        FlowRecord {
            source_id: "a".to_string(),
            destination_id: "b".to_string(),
            source_ip: "10.0.0.1".parse().unwrap(),
            destination_ip: "10.0.0.2".parse().unwrap(),
            destination_port: 9000,
            action: FlowAction::Accept,
            drop_reason: None,
            policy_id: policy_id.to_string(),
            observed_policy_id: None,
            count,
        }
    }

    #[test]
    fn memory_collector_aggregates_by_hash() {
        let collector = MemoryCollector::new();
        collector.collect_flow_event(flow_record("p1", 1));
        collector.collect_flow_event(flow_record("p1", 2));
        collector.collect_flow_event(flow_record("p2", 1));

        let mut flows = collector.flows();
        flows.sort_by(|a, b| a.policy_id.cmp(&b.policy_id));
        assert_eq!(flows.len(), 2);
        assert_eq!(flows[0].count, 3);
        assert_eq!(flows[1].count, 1);
    }

    #[test]
    fn memory_collector_normalizes_zero_count() {
        let collector = MemoryCollector::new();
        collector.collect_flow_event(flow_record("p1", 0));
        assert_eq!(collector.flows()[0].count, 1);
    }

    #[test]
    fn json_token_roundtrip() {
        let policy = PuPolicy {
            management_id: "pu-a".to_string(),
            identity: TagStore::from_slice(&["app=web"]),
            ..PuPolicy::default()
        };
        let ctx = PuContext::from_policy(&policy, 1, 16).unwrap();
        let accessor = JsonTokenAccessor::new();

        let mut sender = AuthInfo::default();
        let token = accessor.create_syn_token(&ctx, &mut sender).unwrap();
        assert_eq!(sender.local_context_id, "pu-a");

        let mut receiver = AuthInfo::default();
        let claims = accessor.parse_packet_token(&mut receiver, &token).unwrap();
        assert_eq!(claims.tags.get("app"), Some("web"));
        assert_eq!(claims.transmitter_label(), Some("pu-a"));
        assert_eq!(receiver.remote_context_id, "pu-a");
    }

    #[test]
    fn garbage_token_fails_parse() {
        let accessor = JsonTokenAccessor::new();
        let mut auth = AuthInfo::default();
        assert!(matches!(
            accessor.parse_packet_token(&mut auth, b"not json"),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn ack_token_verifies_both_nonces() {
        let accessor = JsonTokenAccessor::new();

        // Initiator A knows its own nonce and B's.
        let mut a = AuthInfo {
            local_nonce: b"nonce-a".to_vec(),
            remote_nonce: b"nonce-b".to_vec(),
            ..AuthInfo::default()
        };
        // Responder B holds the mirror image.
        let mut b = AuthInfo {
            local_nonce: b"nonce-b".to_vec(),
            remote_nonce: b"nonce-a".to_vec(),
            ..AuthInfo::default()
        };

        let policy = PuPolicy {
            management_id: "pu-a".to_string(),
            ..PuPolicy::default()
        };
        let ctx = PuContext::from_policy(&policy, 1, 16).unwrap();
        let ack = accessor.create_ack_token(&ctx, &mut a).unwrap();
        assert!(accessor.parse_ack_token(&mut b, &ack).is_ok());

        b.remote_nonce = b"wrong".to_vec();
        assert!(matches!(
            accessor.parse_ack_token(&mut b, &ack),
            Err(TokenError::Signature)
        ));
    }
}
