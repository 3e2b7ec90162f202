use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::policy::entity::{FlowPolicy, IpRule, PortRange};

use super::error::AclError;

/// A port range with the decision applied when it matches.
#[derive(Debug, Clone)]
pub struct PortAction {
    pub range: PortRange,
    pub policy: FlowPolicy,
}

/// All rules sharing one prefix length, keyed by the masked network address.
#[derive(Debug, Clone)]
struct PrefixRules {
    mask_len: u8,
    rules: HashMap<u32, Vec<PortAction>>,
}

/// One tier of the ACL cache: a longest-prefix-match table of IPv4 networks
/// to port actions. Prefix groups are kept sorted by descending mask length
/// so the most specific network is tried first.
#[derive(Debug, Clone, Default)]
pub struct Acl {
    prefixes: Vec<PrefixRules>,
}

impl Acl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Total number of port actions held.
    pub fn rule_count(&self) -> usize {
        self.prefixes
            .iter()
            .flat_map(|p| p.rules.values())
            .map(Vec::len)
            .sum()
    }

    pub fn add_rule(&mut self, rule: &IpRule) -> Result<(), AclError> {
        let (network, mask_len) = parse_cidr(&rule.address)?;
        let range: PortRange = rule.ports.parse().map_err(AclError::Port)?;

        let masked = network & prefix_to_mask(mask_len);
        let position = self
            .prefixes
            .iter()
            .position(|p| p.mask_len == mask_len)
            .unwrap_or_else(|| {
                self.prefixes.push(PrefixRules {
                    mask_len,
                    rules: HashMap::new(),
                });
                self.prefixes.len() - 1
            });
        self.prefixes[position]
            .rules
            .entry(masked)
            .or_default()
            .push(PortAction {
                range,
                policy: rule.policy.clone(),
            });
        Ok(())
    }

    /// Re-sort prefix groups, most specific first. Called after inserts.
    pub fn reverse_sort(&mut self) {
        self.prefixes
            .sort_unstable_by(|a, b| b.mask_len.cmp(&a.mask_len));
    }

    /// Longest-prefix lookup.
    ///
    /// Observe-continue actions accumulate into `report` (first one wins)
    /// without stopping the scan; the first enforceable action is returned.
    pub fn find(
        &self,
        ip: Ipv4Addr,
        port: u16,
        report: &mut Option<FlowPolicy>,
    ) -> Option<FlowPolicy> {
        let ip = u32::from(ip);
        for group in &self.prefixes {
            let masked = ip & prefix_to_mask(group.mask_len);
            let Some(actions) = group.rules.get(&masked) else {
                continue;
            };
            for action in actions {
                if !action.range.contains(port) {
                    continue;
                }
                if action.policy.observe_action.observe_continue() {
                    if report.is_none() {
                        *report = Some(action.policy.clone());
                    }
                    continue;
                }
                if report.is_none() {
                    *report = Some(action.policy.clone());
                }
                return Some(action.policy.clone());
            }
        }
        None
    }
}

/// Parse `"a.b.c.d/len"` (a bare address means `/32`).
pub fn parse_cidr(spec: &str) -> Result<(u32, u8), AclError> {
    let invalid = || AclError::InvalidCidr {
        spec: spec.to_string(),
    };
    let (addr, len) = match spec.split_once('/') {
        Some((addr, len)) => {
            let len: u8 = len.trim().parse().map_err(|_| invalid())?;
            if len > 32 {
                return Err(AclError::InvalidPrefixLen { len });
            }
            (addr, len)
        }
        None => (spec, 32),
    };
    let ip: Ipv4Addr = addr.trim().parse().map_err(|_| invalid())?;
    Ok((u32::from(ip), len))
}

fn prefix_to_mask(mask_len: u8) -> u32 {
    if mask_len == 0 {
        0
    } else {
        !0u32 << (32 - mask_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::entity::Protocol;
    use crate::policy::entity::{FlowAction, ObserveAction};

    fn rule(address: &str, ports: &str, action: FlowAction, id: &str) -> IpRule {
        IpRule {
            address: address.to_string(),
            ports: ports.to_string(),
            protocol: Protocol::Tcp,
            policy: FlowPolicy::new(action, id, "svc"),
        }
    }

    // ── CIDR parsing ──────────────────────────────────────────────

    #[test]
    fn parse_cidr_with_prefix() {
        assert_eq!(parse_cidr("10.0.0.0/8").unwrap(), (0x0A00_0000, 8));
        assert_eq!(parse_cidr("192.168.1.0/24").unwrap(), (0xC0A8_0100, 24));
    }

    #[test]
    fn parse_bare_address_is_host_route() {
        assert_eq!(parse_cidr("10.1.2.3").unwrap(), (0x0A01_0203, 32));
    }

    #[test]
    fn parse_cidr_rejects_garbage() {
        assert!(parse_cidr("not-an-ip/8").is_err());
        assert!(parse_cidr("10.0.0.0/33").is_err());
        assert!(parse_cidr("10.0.0.0/x").is_err());
    }

    // ── Lookup ────────────────────────────────────────────────────

    #[test]
    fn empty_acl_finds_nothing() {
        let acl = Acl::new();
        let mut report = None;
        assert!(
            acl.find("10.0.0.1".parse().unwrap(), 80, &mut report)
                .is_none()
        );
        assert!(report.is_none());
    }

    #[test]
    fn host_rule_matches_exact_ip_and_port() {
        let mut acl = Acl::new();
        acl.add_rule(&rule("10.1.2.3", "443", FlowAction::Accept, "r1"))
            .unwrap();
        acl.reverse_sort();

        let mut report = None;
        let hit = acl.find("10.1.2.3".parse().unwrap(), 443, &mut report);
        assert_eq!(hit.unwrap().policy_id, "r1");

        let mut report = None;
        assert!(
            acl.find("10.1.2.3".parse().unwrap(), 444, &mut report)
                .is_none()
        );
        assert!(
            acl.find("10.1.2.4".parse().unwrap(), 443, &mut None)
                .is_none()
        );
    }

    #[test]
    fn longest_prefix_wins() {
        let mut acl = Acl::new();
        acl.add_rule(&rule("10.0.0.0/8", "80", FlowAction::Reject, "wide"))
            .unwrap();
        acl.add_rule(&rule("10.1.0.0/16", "80", FlowAction::Accept, "narrow"))
            .unwrap();
        acl.reverse_sort();

        let mut report = None;
        let hit = acl.find("10.1.2.3".parse().unwrap(), 80, &mut report);
        assert_eq!(hit.unwrap().policy_id, "narrow");

        let hit = acl.find("10.2.2.3".parse().unwrap(), 80, &mut None);
        assert_eq!(hit.unwrap().policy_id, "wide");
    }

    #[test]
    fn port_range_rule() {
        let mut acl = Acl::new();
        acl.add_rule(&rule("0.0.0.0/0", "8000:9000", FlowAction::Accept, "r"))
            .unwrap();
        acl.reverse_sort();

        assert!(acl.find("1.2.3.4".parse().unwrap(), 8500, &mut None).is_some());
        assert!(acl.find("1.2.3.4".parse().unwrap(), 9001, &mut None).is_none());
    }

    #[test]
    fn observe_continue_accumulates_without_stopping() {
        let mut acl = Acl::new();
        let mut observer = rule("10.0.0.0/8", "80", FlowAction::Accept, "observer");
        observer.policy.observe_action = ObserveAction::Continue;
        acl.add_rule(&observer).unwrap();
        acl.add_rule(&rule("10.0.0.0/8", "80", FlowAction::Accept, "enforcer"))
            .unwrap();
        acl.reverse_sort();

        let mut report = None;
        let hit = acl.find("10.0.0.1".parse().unwrap(), 80, &mut report);
        assert_eq!(hit.unwrap().policy_id, "enforcer");
        assert_eq!(report.unwrap().policy_id, "observer");
    }

    #[test]
    fn observe_only_match_leaves_no_enforceable_hit() {
        let mut acl = Acl::new();
        let mut observer = rule("10.0.0.0/8", "80", FlowAction::Accept, "observer");
        observer.policy.observe_action = ObserveAction::Continue;
        acl.add_rule(&observer).unwrap();
        acl.reverse_sort();

        let mut report = None;
        assert!(
            acl.find("10.0.0.1".parse().unwrap(), 80, &mut report)
                .is_none()
        );
        assert_eq!(report.unwrap().policy_id, "observer");
    }

    #[test]
    fn invalid_port_spec_rejected() {
        let mut acl = Acl::new();
        assert!(
            acl.add_rule(&rule("10.0.0.0/8", "http", FlowAction::Accept, "r"))
                .is_err()
        );
    }
}
