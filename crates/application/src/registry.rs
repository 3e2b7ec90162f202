use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock};

use domain::pucontext::context::PuContext;

use crate::error::DatapathError;

/// Maps processing units to their enforcement contexts.
///
/// The data plane resolves contexts by packet attributes (IP address,
/// then socket mark); the control plane registers and replaces them.
/// Readers get an `Arc` snapshot, so an in-flight packet keeps a
/// coherent context even across a concurrent policy update.
#[derive(Default)]
pub struct ContextRegistry {
    by_id: RwLock<HashMap<String, Arc<PuContext>>>,
    by_ip: RwLock<HashMap<Ipv4Addr, Arc<PuContext>>>,
    by_mark: RwLock<HashMap<u32, Arc<PuContext>>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace a context, indexing it by its IPs and mark.
    pub fn register(&self, context: Arc<PuContext>, ips: &[Ipv4Addr]) {
        let id = context.management_id().to_string();

        // Replacing an existing registration drops its stale indexes first.
        self.unregister(&id);

        let mut by_ip = self.by_ip.write().expect("registry lock poisoned");
        for ip in ips {
            by_ip.insert(*ip, context.clone());
        }
        drop(by_ip);

        self.by_mark
            .write()
            .expect("registry lock poisoned")
            .insert(context.mark(), context.clone());
        self.by_id
            .write()
            .expect("registry lock poisoned")
            .insert(id, context);
    }

    /// Remove a context and all its indexes. Returns the removed context.
    pub fn unregister(&self, management_id: &str) -> Option<Arc<PuContext>> {
        let removed = self
            .by_id
            .write()
            .expect("registry lock poisoned")
            .remove(management_id)?;

        self.by_ip
            .write()
            .expect("registry lock poisoned")
            .retain(|_, c| c.management_id() != management_id);
        self.by_mark
            .write()
            .expect("registry lock poisoned")
            .retain(|_, c| c.management_id() != management_id);
        Some(removed)
    }

    pub fn get(&self, management_id: &str) -> Option<Arc<PuContext>> {
        self.by_id
            .read()
            .expect("registry lock poisoned")
            .get(management_id)
            .cloned()
    }

    /// Resolve the context for a packet: by address first, by socket mark
    /// as a fallback (host-mode processes share addresses).
    pub fn context_from_ip(&self, ip: Ipv4Addr, mark: u32) -> Result<Arc<PuContext>, DatapathError> {
        if let Some(ctx) = self.by_ip.read().expect("registry lock poisoned").get(&ip) {
            return Ok(ctx.clone());
        }
        if let Some(ctx) = self
            .by_mark
            .read()
            .expect("registry lock poisoned")
            .get(&mark)
        {
            return Ok(ctx.clone());
        }
        Err(DatapathError::NoContext(ip.to_string()))
    }

    pub fn count(&self) -> usize {
        self.by_id.read().expect("registry lock poisoned").len()
    }
}
