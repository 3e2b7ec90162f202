use std::net::Ipv4Addr;

use crate::policy::entity::{FlowPolicy, IpRule};

use super::acl::Acl;
use super::error::AclError;

/// Result of an ACL lookup.
///
/// `report` is what gets reported (observed policy when an observe-continue
/// rule fired), `packet` is what gets enforced. `matched` is false when only
/// the reject catch-all applied.
#[derive(Debug, Clone)]
pub struct AclLookup {
    pub report: FlowPolicy,
    pub packet: FlowPolicy,
    pub matched: bool,
}

/// Three-tier ACL: reject rules beat accept rules beat observe rules,
/// regardless of prefix length or insertion order.
#[derive(Debug, Clone, Default)]
pub struct AclCache {
    reject: Acl,
    accept: Acl,
    observe: Acl,
}

impl AclCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule_count(&self) -> usize {
        self.reject.rule_count() + self.accept.rule_count() + self.observe.rule_count()
    }

    /// Add a single rule, classified by its policy: observe-apply rules go
    /// to the observe tier, accepted actions to the accept tier, everything
    /// else to the reject tier.
    pub fn add_rule(&mut self, rule: &IpRule) -> Result<(), AclError> {
        let result = if rule.policy.observe_action.observe_apply() {
            self.observe.add_rule(rule)
        } else if rule.policy.action.accepted() {
            self.accept.add_rule(rule)
        } else {
            self.reject.add_rule(rule)
        };

        self.reject.reverse_sort();
        self.accept.reverse_sort();
        self.observe.reverse_sort();
        result
    }

    pub fn add_rule_list(&mut self, rules: &[IpRule]) -> Result<(), AclError> {
        for rule in rules {
            self.add_rule(rule)?;
        }
        Ok(())
    }

    /// Resolve the action for a destination endpoint.
    ///
    /// Falls back to the reject catch-all when no tier matches.
    pub fn get_matching_action(&self, ip: Ipv4Addr, port: u16) -> AclLookup {
        let mut report = None;

        for tier in [&self.reject, &self.accept, &self.observe] {
            if let Some(packet) = tier.find(ip, port, &mut report) {
                let report = report.unwrap_or_else(|| packet.clone());
                return AclLookup {
                    report,
                    packet,
                    matched: true,
                };
            }
        }

        AclLookup {
            report: report.unwrap_or_else(FlowPolicy::catch_all),
            packet: FlowPolicy::catch_all(),
            matched: false,
        }
    }
}
