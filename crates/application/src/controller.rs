use std::collections::HashMap;
use std::hash::{BuildHasher, RandomState};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use domain::pucontext::context::{PuContext, PuPolicy, PuRuntime};
use domain::report::entity::{ContainerEvent, ContainerRecord};
use ports::secondary::collector_port::CollectorPort;
use ports::secondary::metrics_port::MetricsPort;
use tokio_util::sync::CancellationToken;

use crate::allocator::PortAllocator;
use crate::datapath::Datapath;
use crate::error::ControlError;

/// Number of sharded per-PU locks. Operations on the same PU always hash
/// to the same shard, giving the required serialization without a map that
/// grows with every PU ever seen.
const LOCK_SHARDS: usize = 32;

/// First mark value handed to a processing unit. Low values are left to
/// the conntrack bypass mark and friends.
const MARK_BASE: u32 = 0x100;

#[derive(Clone, Copy)]
struct PuAllocation {
    proxy_port: u16,
    mark: u32,
}

/// Control plane of the enforcement core.
///
/// Receives enforce/unenforce/update events from the monitor, owns the
/// proxy-port pool and the monotonic mark counter, and installs per-PU
/// contexts into the datapath. Same-PU operations are serialized through
/// sharded locks; distinct PUs proceed in parallel.
pub struct Controller {
    datapath: Arc<Datapath>,
    collector: Arc<dyn CollectorPort>,
    metrics: Arc<dyn MetricsPort>,
    locks: Vec<tokio::sync::Mutex<()>>,
    allocations: Mutex<HashMap<String, PuAllocation>>,
    ports: PortAllocator,
    next_mark: AtomicU32,
    hasher: RandomState,
}

impl Controller {
    pub fn new(
        datapath: Arc<Datapath>,
        collector: Arc<dyn CollectorPort>,
        metrics: Arc<dyn MetricsPort>,
        proxy_port_start: u16,
        proxy_port_count: u16,
    ) -> Self {
        Self {
            datapath,
            collector,
            metrics,
            locks: (0..LOCK_SHARDS).map(|_| tokio::sync::Mutex::new(())).collect(),
            allocations: Mutex::new(HashMap::new()),
            ports: PortAllocator::new(proxy_port_start, proxy_port_count),
            next_mark: AtomicU32::new(MARK_BASE),
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, pu_id: &str) -> &tokio::sync::Mutex<()> {
        let idx = self.hasher.hash_one(pu_id) as usize % LOCK_SHARDS;
        &self.locks[idx]
    }

    /// Install (or reinstall) enforcement for a processing unit.
    ///
    /// Idempotent: re-enforcing keeps the PU's proxy port and mark and
    /// rebuilds the context from the given policy. A failed or cancelled
    /// enforce releases any freshly allocated resources.
    pub async fn enforce(
        &self,
        pu_id: &str,
        policy: &PuPolicy,
        runtime: &PuRuntime,
        cancel: &CancellationToken,
    ) -> Result<(), ControlError> {
        let _guard = self.shard(pu_id).lock().await;

        if !must_enforce(policy) {
            self.emit(pu_id, runtime, Some(policy), ContainerEvent::Ignored);
            return Ok(());
        }

        let existing = self
            .allocations
            .lock()
            .expect("allocations lock poisoned")
            .get(pu_id)
            .copied();
        let (alloc, fresh) = match existing {
            Some(alloc) => (alloc, false),
            None => {
                let Some(port) = self.ports.allocate() else {
                    self.emit(pu_id, runtime, Some(policy), ContainerEvent::Failed);
                    self.metrics.record_policy_operation("enforce", "failure");
                    return Err(ControlError::PortsExhausted);
                };
                let mark = self.next_mark.fetch_add(1, Ordering::Relaxed);
                (PuAllocation { proxy_port: port, mark }, true)
            }
        };

        if cancel.is_cancelled() {
            if fresh {
                self.ports.release(alloc.proxy_port);
            }
            return Err(ControlError::Cancelled);
        }

        let dns_rule_limit = self.datapath.config().dns_rule_limit;
        let context = match PuContext::from_policy(policy, alloc.mark, dns_rule_limit) {
            Ok(context) => Arc::new(context),
            Err(err) => {
                if fresh {
                    self.ports.release(alloc.proxy_port);
                }
                self.emit(pu_id, runtime, Some(policy), ContainerEvent::Failed);
                self.metrics.record_policy_operation("enforce", "failure");
                return Err(err.into());
            }
        };

        self.datapath.register_pu(context, &runtime.ip_addresses);
        if fresh {
            self.allocations
                .lock()
                .expect("allocations lock poisoned")
                .insert(pu_id.to_string(), alloc);
        }

        self.emit(pu_id, runtime, Some(policy), ContainerEvent::Start);
        self.metrics.record_policy_operation("enforce", "success");
        self.metrics
            .set_pus_enforced(self.datapath.registry().count() as u64);
        Ok(())
    }

    /// Tear enforcement down and release the PU's resources. Idempotent.
    pub async fn unenforce(&self, pu_id: &str, runtime: &PuRuntime) -> Result<(), ControlError> {
        let _guard = self.shard(pu_id).lock().await;

        self.emit(pu_id, runtime, None, ContainerEvent::Delete);
        self.datapath.unregister_pu(pu_id);

        let removed = self
            .allocations
            .lock()
            .expect("allocations lock poisoned")
            .remove(pu_id);
        if let Some(alloc) = removed {
            self.ports.release(alloc.proxy_port);
        }

        self.metrics.record_policy_operation("unenforce", "success");
        self.metrics
            .set_pus_enforced(self.datapath.registry().count() as u64);
        Ok(())
    }

    /// Replace an enforced PU's policy. A no-op when the PU is not
    /// enforced.
    pub async fn update_policy(
        &self,
        pu_id: &str,
        policy: &PuPolicy,
        runtime: &PuRuntime,
        cancel: &CancellationToken,
    ) -> Result<(), ControlError> {
        let _guard = self.shard(pu_id).lock().await;

        let existing = self
            .allocations
            .lock()
            .expect("allocations lock poisoned")
            .get(pu_id)
            .copied();
        let Some(alloc) = existing else {
            return Ok(());
        };

        if cancel.is_cancelled() {
            return Err(ControlError::Cancelled);
        }

        let dns_rule_limit = self.datapath.config().dns_rule_limit;
        let context = match PuContext::from_policy(policy, alloc.mark, dns_rule_limit) {
            Ok(context) => Arc::new(context),
            Err(err) => {
                self.emit(pu_id, runtime, Some(policy), ContainerEvent::Failed);
                self.metrics.record_policy_operation("update", "failure");
                return Err(err.into());
            }
        };

        self.datapath.register_pu(context, &runtime.ip_addresses);
        self.emit(pu_id, runtime, Some(policy), ContainerEvent::Update);
        self.metrics.record_policy_operation("update", "success");
        Ok(())
    }

    /// Proxy port allocated for a PU, when enforced.
    pub fn proxy_port(&self, pu_id: &str) -> Option<u16> {
        self.allocations
            .lock()
            .expect("allocations lock poisoned")
            .get(pu_id)
            .map(|a| a.proxy_port)
    }

    fn emit(
        &self,
        pu_id: &str,
        runtime: &PuRuntime,
        policy: Option<&PuPolicy>,
        event: ContainerEvent,
    ) {
        self.collector.collect_container_event(ContainerRecord {
            context_id: pu_id.to_string(),
            ip_addresses: runtime.ip_addresses.clone(),
            tags: policy.map(|p| p.identity.clone()),
            event,
        });
    }
}

/// A policy with no rules and no ACLs has nothing to enforce.
fn must_enforce(policy: &PuPolicy) -> bool {
    !(policy.receiver_rules.is_empty()
        && policy.transmitter_rules.is_empty()
        && policy.application_acls.is_empty()
        && policy.network_acls.is_empty()
        && policy.dns_acls.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapath::DatapathConfig;
    use domain::policy::entity::{
        FlowAction, FlowPolicy, KeyValueOperator, Operator, TagSelector,
    };
    use domain::policy::tags::TagStore;
    use ports::test_utils::{
        JsonTokenAccessor, MemoryCollector, MemoryWriter, NoopMetrics, RecordingConntrack,
    };

    fn controller() -> (Controller, Arc<MemoryCollector>) {
        let collector = Arc::new(MemoryCollector::new());
        let dp = Arc::new(Datapath::new(
            DatapathConfig::default(),
            Arc::new(JsonTokenAccessor::new()),
            Arc::new(RecordingConntrack::new()),
            collector.clone(),
            Arc::new(MemoryWriter::new()),
            Arc::new(NoopMetrics),
        ));
        (
            Controller::new(dp, collector.clone(), Arc::new(NoopMetrics), 20000, 4),
            collector,
        )
    }

    fn enforced_policy(id: &str) -> PuPolicy {
        PuPolicy {
            management_id: id.to_string(),
            identity: TagStore::from_slice(&["app=web"]),
            receiver_rules: vec![TagSelector {
                clauses: vec![KeyValueOperator {
                    key: "app".to_string(),
                    values: vec!["web".to_string()],
                    operator: Operator::Equal,
                    id: None,
                }],
                policy: FlowPolicy::new(FlowAction::Accept, "p1", "s1"),
            }],
            ..PuPolicy::default()
        }
    }

    fn runtime() -> PuRuntime {
        PuRuntime {
            ip_addresses: vec!["10.0.0.1".parse().unwrap()],
            pid: Some(4242),
        }
    }

    #[tokio::test]
    async fn enforce_registers_context_and_emits_start() {
        let (controller, collector) = controller();
        let cancel = CancellationToken::new();

        controller
            .enforce("pu-1", &enforced_policy("pu-1"), &runtime(), &cancel)
            .await
            .unwrap();

        assert_eq!(controller.datapath.registry().count(), 1);
        assert_eq!(controller.proxy_port("pu-1"), Some(20000));

        let events = collector.containers();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, ContainerEvent::Start);
        assert_eq!(events[0].context_id, "pu-1");
        assert!(events[0].tags.is_some());
    }

    #[tokio::test]
    async fn enforce_is_idempotent() {
        let (controller, _collector) = controller();
        let cancel = CancellationToken::new();
        let policy = enforced_policy("pu-1");

        controller
            .enforce("pu-1", &policy, &runtime(), &cancel)
            .await
            .unwrap();
        let first_port = controller.proxy_port("pu-1").unwrap();
        let first_mark = controller.datapath.registry().get("pu-1").unwrap().mark();

        controller
            .enforce("pu-1", &policy, &runtime(), &cancel)
            .await
            .unwrap();

        assert_eq!(controller.datapath.registry().count(), 1);
        assert_eq!(controller.proxy_port("pu-1"), Some(first_port));
        assert_eq!(
            controller.datapath.registry().get("pu-1").unwrap().mark(),
            first_mark
        );
    }

    #[tokio::test]
    async fn empty_policy_is_ignored() {
        let (controller, collector) = controller();
        let policy = PuPolicy {
            management_id: "pu-1".to_string(),
            ..PuPolicy::default()
        };

        controller
            .enforce("pu-1", &policy, &runtime(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(controller.datapath.registry().count(), 0);
        assert!(controller.proxy_port("pu-1").is_none());
        assert_eq!(collector.containers()[0].event, ContainerEvent::Ignored);
    }

    #[tokio::test]
    async fn cancelled_enforce_rolls_back_allocation() {
        let (controller, collector) = controller();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = controller
            .enforce("pu-1", &enforced_policy("pu-1"), &runtime(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Cancelled));

        assert_eq!(controller.datapath.registry().count(), 0);
        assert!(controller.proxy_port("pu-1").is_none());
        assert_eq!(controller.ports.available(), 4);
        assert!(collector.containers().is_empty());
    }

    #[tokio::test]
    async fn unenforce_releases_resources() {
        let (controller, collector) = controller();
        let cancel = CancellationToken::new();

        controller
            .enforce("pu-1", &enforced_policy("pu-1"), &runtime(), &cancel)
            .await
            .unwrap();
        controller.unenforce("pu-1", &runtime()).await.unwrap();

        assert_eq!(controller.datapath.registry().count(), 0);
        assert!(controller.proxy_port("pu-1").is_none());
        assert_eq!(controller.ports.available(), 4);

        let events = collector.containers();
        assert_eq!(events[1].event, ContainerEvent::Delete);
    }

    #[tokio::test]
    async fn unenforce_of_unknown_pu_is_harmless() {
        let (controller, _collector) = controller();
        controller.unenforce("ghost", &runtime()).await.unwrap();
        assert_eq!(controller.ports.available(), 4);
    }

    #[tokio::test]
    async fn update_policy_without_enforce_is_noop() {
        let (controller, collector) = controller();
        controller
            .update_policy(
                "pu-1",
                &enforced_policy("pu-1"),
                &runtime(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(controller.datapath.registry().count(), 0);
        assert!(collector.containers().is_empty());
    }

    #[tokio::test]
    async fn update_policy_swaps_context_and_keeps_mark() {
        let (controller, collector) = controller();
        let cancel = CancellationToken::new();

        controller
            .enforce("pu-1", &enforced_policy("pu-1"), &runtime(), &cancel)
            .await
            .unwrap();
        let mark = controller.datapath.registry().get("pu-1").unwrap().mark();

        let mut updated = enforced_policy("pu-1");
        updated.identity = TagStore::from_slice(&["app=web", "env=prod"]);
        controller
            .update_policy("pu-1", &updated, &runtime(), &cancel)
            .await
            .unwrap();

        let context = controller.datapath.registry().get("pu-1").unwrap();
        assert_eq!(context.mark(), mark);
        assert_eq!(context.identity().get("env"), Some("prod"));
        assert_eq!(
            collector.containers().last().unwrap().event,
            ContainerEvent::Update
        );
    }

    #[tokio::test]
    async fn port_pool_exhaustion_fails_enforce() {
        let (controller, collector) = controller();
        let cancel = CancellationToken::new();

        for i in 0..4 {
            controller
                .enforce(
                    &format!("pu-{i}"),
                    &enforced_policy(&format!("pu-{i}")),
                    &runtime(),
                    &cancel,
                )
                .await
                .unwrap();
        }

        let err = controller
            .enforce("pu-5", &enforced_policy("pu-5"), &runtime(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::PortsExhausted));
        assert_eq!(
            collector.containers().last().unwrap().event,
            ContainerEvent::Failed
        );
    }
}
