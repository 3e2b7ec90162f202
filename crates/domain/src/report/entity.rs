use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::policy::entity::FlowAction;
use crate::policy::tags::TagStore;

/// Endpoint label used when the peer has no resolvable identity.
pub const DEFAULT_ENDPOINT: &str = "default";

/// Why a flow was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    InvalidToken,
    MissingToken,
    PolicyDrop,
    InvalidFormat,
    StateError,
    UnableToDial,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid_token",
            Self::MissingToken => "missing_token",
            Self::PolicyDrop => "policy_drop",
            Self::InvalidFormat => "invalid_format",
            Self::StateError => "state_error",
            Self::UnableToDial => "unable_to_dial",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single flow verdict shipped to the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub source_id: String,
    pub destination_id: String,
    pub source_ip: Ipv4Addr,
    pub destination_ip: Ipv4Addr,
    pub destination_port: u16,
    pub action: FlowAction,
    pub drop_reason: Option<DropReason>,
    pub policy_id: String,
    pub observed_policy_id: Option<String>,
    /// Number of flows this record stands for; collectors aggregate by
    /// stats hash and a zero count is normalized to 1.
    pub count: u64,
}

impl FlowRecord {
    /// Key used by collectors to merge repeated observations of the same
    /// verdict.
    pub fn stats_hash(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.source_id,
            self.destination_id,
            self.source_ip,
            self.destination_ip,
            self.destination_port,
            self.action,
            self.policy_id,
        )
    }
}

/// Processing-unit lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerEvent {
    Start,
    Update,
    Delete,
    Ignored,
    Failed,
}

impl ContainerEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Ignored => "ignored",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub context_id: String,
    pub ip_addresses: Vec<Ipv4Addr>,
    pub tags: Option<TagStore>,
    pub event: ContainerEvent,
}
