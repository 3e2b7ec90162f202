use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::acls::cache::{AclCache, AclLookup};
use crate::common::error::DomainError;
use crate::lookup::engine::PolicyDb;
use crate::policy::entity::{FlowPolicy, IpRule, TagSelector};
use crate::policy::tags::TagStore;

/// The policy snapshot handed over at enforce time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PuPolicy {
    pub management_id: String,
    pub identity: TagStore,
    pub receiver_rules: Vec<TagSelector>,
    pub transmitter_rules: Vec<TagSelector>,
    pub application_acls: Vec<IpRule>,
    pub network_acls: Vec<IpRule>,
    /// Hostname to CSV port-range list; expanded into `application_acls`
    /// as DNS answers are observed on the wire.
    pub dns_acls: HashMap<String, String>,
}

/// Runtime facts about a processing unit, provided by the monitor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PuRuntime {
    pub ip_addresses: Vec<Ipv4Addr>,
    pub pid: Option<u32>,
}

/// Per-processing-unit enforcement state.
///
/// The policy databases and network ACLs are immutable for the lifetime of
/// the context; policy updates install a fresh context. `application_acls`
/// is the one exception: DNS expansion appends to it from the datapath, so
/// it serializes through an internal lock.
#[derive(Debug)]
pub struct PuContext {
    management_id: String,
    identity: TagStore,
    rcv_rules: PolicyDb,
    txt_rules: PolicyDb,
    application_acls: RwLock<AclCache>,
    network_acls: AclCache,
    dns_acls: HashMap<String, String>,
    dns_expanded: AtomicUsize,
    dns_rule_limit: usize,
    mark: u32,
}

impl PuContext {
    /// Build a context from a policy snapshot. `mark` is the conntrack/socket
    /// mark assigned to this PU; `dns_rule_limit` bounds DNS-driven ACL
    /// growth.
    pub fn from_policy(
        policy: &PuPolicy,
        mark: u32,
        dns_rule_limit: usize,
    ) -> Result<Self, DomainError> {
        let mut rcv_rules = PolicyDb::new();
        for selector in &policy.receiver_rules {
            rcv_rules.add_policy(selector.clone())?;
        }

        let mut txt_rules = PolicyDb::new();
        for selector in &policy.transmitter_rules {
            txt_rules.add_policy(selector.clone())?;
        }

        let mut application_acls = AclCache::new();
        application_acls.add_rule_list(&policy.application_acls)?;

        let mut network_acls = AclCache::new();
        network_acls.add_rule_list(&policy.network_acls)?;

        Ok(Self {
            management_id: policy.management_id.clone(),
            identity: policy.identity.clone(),
            rcv_rules,
            txt_rules,
            application_acls: RwLock::new(application_acls),
            network_acls,
            dns_acls: policy.dns_acls.clone(),
            dns_expanded: AtomicUsize::new(0),
            dns_rule_limit,
            mark,
        })
    }

    pub fn management_id(&self) -> &str {
        &self.management_id
    }

    pub fn identity(&self) -> &TagStore {
        &self.identity
    }

    pub fn mark(&self) -> u32 {
        self.mark
    }

    /// Match inbound peer claims against the receiver rules.
    ///
    /// Returns `(report, packet)`; no rule hit yields the reject catch-all.
    pub fn search_rcv_rules(&self, claims: &TagStore) -> (FlowPolicy, FlowPolicy) {
        match self.rcv_rules.search(claims) {
            Some((_, policy)) => (policy.clone(), policy.clone()),
            None => (FlowPolicy::catch_all(), FlowPolicy::catch_all()),
        }
    }

    /// Match outbound peer claims against the transmitter rules.
    ///
    /// With `skip_if_no_match` (mutual authorization disabled) a miss
    /// half-authenticates the flow instead of rejecting it.
    pub fn search_txt_rules(
        &self,
        claims: &TagStore,
        skip_if_no_match: bool,
    ) -> (Option<FlowPolicy>, FlowPolicy) {
        match self.txt_rules.search(claims) {
            Some((_, policy)) => (Some(policy.clone()), policy.clone()),
            None if skip_if_no_match => (None, FlowPolicy::accept_default()),
            None => (Some(FlowPolicy::catch_all()), FlowPolicy::catch_all()),
        }
    }

    /// Authorize an outbound connection to an external (identity-less)
    /// endpoint.
    pub fn application_acl_lookup(&self, ip: Ipv4Addr, port: u16) -> AclLookup {
        self.application_acls
            .read()
            .expect("application ACL lock poisoned")
            .get_matching_action(ip, port)
    }

    /// Authorize an inbound connection from an external endpoint.
    pub fn network_acl_lookup(&self, ip: Ipv4Addr, port: u16) -> AclLookup {
        self.network_acls.get_matching_action(ip, port)
    }

    /// CSV port list configured for a DNS name, if any.
    pub fn dns_ports_for(&self, name: &str) -> Option<&str> {
        self.dns_acls.get(name).map(String::as_str)
    }

    pub fn has_dns_acls(&self) -> bool {
        !self.dns_acls.is_empty()
    }

    /// Append a DNS-expanded rule to the application ACLs.
    ///
    /// Expansion is append-only and capacity bounded; once the limit is
    /// reached further answers are ignored.
    pub fn add_dns_expanded_rule(&self, rule: &IpRule) -> Result<(), DomainError> {
        if self.dns_expanded.fetch_add(1, Ordering::Relaxed) >= self.dns_rule_limit {
            self.dns_expanded.fetch_sub(1, Ordering::Relaxed);
            return Err(DomainError::EngineError(format!(
                "dns acl expansion limit reached for {}",
                self.management_id
            )));
        }
        self.application_acls
            .write()
            .expect("application ACL lock poisoned")
            .add_rule(rule)?;
        Ok(())
    }

    /// Number of DNS-expanded rules installed so far.
    pub fn dns_expanded_count(&self) -> usize {
        self.dns_expanded.load(Ordering::Relaxed)
    }
}
