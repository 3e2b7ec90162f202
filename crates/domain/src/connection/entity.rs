use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::packet::entity::UdpPacket;
use crate::policy::entity::FlowPolicy;
use crate::pucontext::context::PuContext;

use super::error::ConnectionError;

/// Authentication state of a UDP flow.
///
/// Declaration order is the allowed progression; a flow never moves
/// backwards. Initiators go SynStart -> SynSend -> SynAckReceived ->
/// AckProcessed, responders SynStart -> SynReceived -> SynAckSent ->
/// AckReceived -> AckProcessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConnState {
    SynStart,
    SynSend,
    SynReceived,
    SynAckSent,
    SynAckReceived,
    AckReceived,
    AckProcessed,
}

impl ConnState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SynStart => "syn_start",
            Self::SynSend => "syn_send",
            Self::SynReceived => "syn_received",
            Self::SynAckSent => "synack_sent",
            Self::SynAckReceived => "synack_received",
            Self::AckReceived => "ack_received",
            Self::AckProcessed => "ack_processed",
        }
    }
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-connection authentication material exchanged during the handshake.
#[derive(Debug, Clone, Default)]
pub struct AuthInfo {
    pub local_context_id: String,
    pub remote_context_id: String,
    pub local_nonce: Vec<u8>,
    pub remote_nonce: Vec<u8>,
}

/// Per-flow connection state for the UDP authentication datapath.
///
/// Payload packets that arrive before the handshake completes are queued
/// here (bounded; overflow drops the oldest) and flushed in order once the
/// flow is authorized.
#[derive(Debug)]
pub struct UdpConnection {
    context: Arc<PuContext>,
    pub auth: AuthInfo,
    state: ConnState,
    queue: VecDeque<UdpPacket>,
    queue_limit: usize,
    dropped: u64,
    pub report_flow_policy: Option<FlowPolicy>,
    pub packet_flow_policy: Option<FlowPolicy>,
    /// Service-proxied connections skip the conntrack bypass.
    pub service_connection: bool,
}

impl UdpConnection {
    pub fn new(context: Arc<PuContext>, queue_limit: usize) -> Self {
        Self {
            context,
            auth: AuthInfo::default(),
            state: ConnState::SynStart,
            queue: VecDeque::new(),
            queue_limit,
            dropped: 0,
            report_flow_policy: None,
            packet_flow_policy: None,
            service_connection: false,
        }
    }

    pub fn context(&self) -> &Arc<PuContext> {
        &self.context
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Advance the state machine. Backward transitions are rejected;
    /// re-entering the current state is a no-op.
    pub fn advance(&mut self, to: ConnState) -> Result<(), ConnectionError> {
        if to < self.state {
            return Err(ConnectionError::BackwardTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Queue a payload packet until authorization completes. When the queue
    /// is full the oldest packet is dropped and returned.
    pub fn queue_packet(&mut self, packet: UdpPacket) -> Option<UdpPacket> {
        let evicted = if self.queue.len() >= self.queue_limit {
            self.dropped += 1;
            self.queue.pop_front()
        } else {
            None
        };
        self.queue.push_back(packet);
        evicted
    }

    /// Take all queued packets in arrival order.
    pub fn drain_queue(&mut self) -> Vec<UdpPacket> {
        self.queue.drain(..).collect()
    }

    /// Discard the queue (rejected flows). Returns the number discarded.
    pub fn drop_queue(&mut self) -> usize {
        let count = self.queue.len();
        self.queue.clear();
        count
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Packets dropped due to queue overflow.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}
