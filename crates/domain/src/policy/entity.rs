use serde::{Deserialize, Serialize};

use crate::common::entity::Protocol;

use super::error::PolicyError;

// ── Selector operators ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Equal,
    NotEqual,
    KeyExists,
    KeyNotExists,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::KeyExists => "exists",
            Self::KeyNotExists => "!exists",
        }
    }
}

/// One clause of a selector: `key <op> values`.
///
/// A value ending in `*` denotes a prefix match; any other value matches
/// exactly. The optional `id` allows peers to reference this clause directly
/// by rule ID in their claim bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueOperator {
    pub key: String,
    pub values: Vec<String>,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl KeyValueOperator {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.key.is_empty() {
            return Err(PolicyError::EmptyClauseKey);
        }
        match self.operator {
            Operator::Equal | Operator::NotEqual => {
                if self.values.is_empty() {
                    return Err(PolicyError::MissingValues(self.operator.as_str()));
                }
            }
            Operator::KeyExists | Operator::KeyNotExists => {
                if !self.values.is_empty() {
                    return Err(PolicyError::UnexpectedValues(self.operator.as_str()));
                }
            }
        }
        Ok(())
    }
}

// ── Flow decisions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    Accept,
    #[default]
    Reject,
    Continue,
}

impl FlowAction {
    pub fn accepted(self) -> bool {
        self == Self::Accept
    }

    pub fn rejected(self) -> bool {
        self == Self::Reject
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Continue => "continue",
        }
    }
}

impl std::fmt::Display for FlowAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observation mode attached to a decision.
///
/// `Continue` records the policy for reporting but keeps evaluating;
/// `Apply` also makes the observed policy the enforced one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObserveAction {
    #[default]
    None,
    Continue,
    Apply,
}

impl ObserveAction {
    pub fn observe_continue(self) -> bool {
        self == Self::Continue
    }

    pub fn observe_apply(self) -> bool {
        self == Self::Apply
    }
}

/// The decision record produced by policy and ACL lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPolicy {
    pub action: FlowAction,
    pub observe_action: ObserveAction,
    pub policy_id: String,
    pub service_id: String,
}

impl FlowPolicy {
    pub fn new(action: FlowAction, policy_id: &str, service_id: &str) -> Self {
        Self {
            action,
            observe_action: ObserveAction::None,
            policy_id: policy_id.to_string(),
            service_id: service_id.to_string(),
        }
    }

    /// The default decision when nothing matches: reject.
    pub fn catch_all() -> Self {
        Self::new(FlowAction::Reject, "default", "default")
    }

    /// The default decision for half-authenticated flows when mutual
    /// authorization is disabled.
    pub fn accept_default() -> Self {
        Self::new(FlowAction::Accept, "default", "default")
    }
}

// ── Selectors ───────────────────────────────────────────────────────

/// AND-conjunction of clauses plus the decision applied on a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSelector {
    pub clauses: Vec<KeyValueOperator>,
    pub policy: FlowPolicy,
}

impl TagSelector {
    pub fn validate(&self) -> Result<(), PolicyError> {
        for clause in &self.clauses {
            clause.validate()?;
        }
        Ok(())
    }
}

// ── Port ranges ─────────────────────────────────────────────────────

/// Inclusive port range. Parses from `"80"` or `"80:443"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.start > self.end {
            return Err(PolicyError::InvalidPortRange {
                spec: format!("{}:{}", self.start, self.end),
            });
        }
        Ok(())
    }
}

impl std::str::FromStr for PortRange {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PolicyError::InvalidPortRange { spec: s.to_string() };
        let range = match s.split_once(':') {
            Some((lo, hi)) => Self {
                start: lo.trim().parse().map_err(|_| invalid())?,
                end: hi.trim().parse().map_err(|_| invalid())?,
            },
            None => {
                let port: u16 = s.trim().parse().map_err(|_| invalid())?;
                Self {
                    start: port,
                    end: port,
                }
            }
        };
        range.validate()?;
        Ok(range)
    }
}

// ── External-service ACL rules ──────────────────────────────────────

/// An IP/port rule authorizing traffic that carries no peer identity.
///
/// `address` is CIDR notation (`"10.1.0.0/16"`, a bare host address means
/// `/32`); `ports` is a single port or a `start:end` range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRule {
    pub address: String,
    pub ports: String,
    pub protocol: Protocol,
    pub policy: FlowPolicy,
}
