use ports::secondary::metrics_port::{ControlMetrics, DatapathMetrics};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ── Label types ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PacketLabels {
    pub direction: String,
    pub verdict: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DirectionLabels {
    pub direction: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ActionLabels {
    pub action: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    pub operation: String,
    pub result: String,
}

// ── Enforcer metrics registry ───────────────────────────────────────

/// Prometheus metrics registry for the enforcer.
///
/// All metric families use interior mutability (atomics), so recording
/// metrics only requires `&self`. The registry itself is NOT Clone —
/// wrap in `Arc` for multi-task sharing.
pub struct EnforcerMetrics {
    registry: Registry,
    pub packets_total: Family<PacketLabels, Counter>,
    pub invalid_tokens_total: Family<DirectionLabels, Counter>,
    pub queue_drops_total: Counter,
    pub flows_total: Family<ActionLabels, Counter>,
    pub dns_expansions_total: Counter,
    pub dns_expansion_overflows_total: Counter,
    pub pus_enforced: Gauge,
    pub policy_operations_total: Family<OperationLabels, Counter>,
}

impl EnforcerMetrics {
    /// Create a new metrics registry with all metrics registered under
    /// the `fluxguard` prefix.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("fluxguard");

        let packets_total = Family::<PacketLabels, Counter>::default();
        registry.register(
            "packets",
            "Packets processed by direction and verdict",
            packets_total.clone(),
        );

        let invalid_tokens_total = Family::<DirectionLabels, Counter>::default();
        registry.register(
            "invalid_tokens",
            "Tokens that failed to parse or verify",
            invalid_tokens_total.clone(),
        );

        let queue_drops_total = Counter::default();
        registry.register(
            "queue_drops",
            "Payload packets dropped due to per-connection queue overflow",
            queue_drops_total.clone(),
        );

        let flows_total = Family::<ActionLabels, Counter>::default();
        registry.register(
            "flows",
            "Flow verdicts by action",
            flows_total.clone(),
        );

        let dns_expansions_total = Counter::default();
        registry.register(
            "dns_expansions",
            "DNS answers expanded into ACL rules",
            dns_expansions_total.clone(),
        );

        let dns_expansion_overflows_total = Counter::default();
        registry.register(
            "dns_expansion_overflows",
            "DNS expansions skipped because the per-PU bound was hit",
            dns_expansion_overflows_total.clone(),
        );

        let pus_enforced = Gauge::default();
        registry.register(
            "pus_enforced",
            "Currently enforced processing units",
            pus_enforced.clone(),
        );

        let policy_operations_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "policy_operations",
            "Enforce/unenforce/update operations by result",
            policy_operations_total.clone(),
        );

        Self {
            registry,
            packets_total,
            invalid_tokens_total,
            queue_drops_total,
            flows_total,
            dns_expansions_total,
            dns_expansion_overflows_total,
            pus_enforced,
            policy_operations_total,
        }
    }

    /// Encode all registered metrics to `OpenMetrics` text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)
            .expect("encoding metrics to string should not fail");
        buffer
    }
}

impl Default for EnforcerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// ── Sub-trait implementations ──────────────────────────────────────

impl DatapathMetrics for EnforcerMetrics {
    fn record_packet(&self, direction: &str, verdict: &str) {
        self.packets_total
            .get_or_create(&PacketLabels {
                direction: direction.to_string(),
                verdict: verdict.to_string(),
            })
            .inc();
    }

    fn record_invalid_token(&self, direction: &str) {
        self.invalid_tokens_total
            .get_or_create(&DirectionLabels {
                direction: direction.to_string(),
            })
            .inc();
    }

    fn record_queue_drop(&self) {
        self.queue_drops_total.inc();
    }

    fn record_flow(&self, action: &str) {
        self.flows_total
            .get_or_create(&ActionLabels {
                action: action.to_string(),
            })
            .inc();
    }

    fn record_dns_expansion(&self) {
        self.dns_expansions_total.inc();
    }

    fn record_dns_expansion_overflow(&self) {
        self.dns_expansion_overflows_total.inc();
    }
}

impl ControlMetrics for EnforcerMetrics {
    fn set_pus_enforced(&self, count: u64) {
        self.pus_enforced.set(count.try_into().unwrap_or(i64::MAX));
    }

    fn record_policy_operation(&self, operation: &str, result: &str) {
        self.policy_operations_total
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
                result: result.to_string(),
            })
            .inc();
    }
}

// MetricsPort is automatically implemented via the blanket impl
// since EnforcerMetrics implements both sub-traits.

#[cfg(test)]
mod tests {
    use super::*;
    use ports::secondary::metrics_port::MetricsPort;

    #[test]
    fn new_creates_valid_registry() {
        let metrics = EnforcerMetrics::new();
        let encoded = metrics.encode();
        // Should contain EOF marker (OpenMetrics format)
        assert!(encoded.contains("# EOF"));
    }

    #[test]
    fn counter_increment_appears_in_output() {
        let metrics = EnforcerMetrics::new();
        metrics.record_packet("app", "deliver");
        metrics.record_packet("app", "deliver");
        metrics.record_packet("net", "drop");

        let encoded = metrics.encode();
        assert!(encoded.contains("fluxguard_packets"));
        assert!(encoded.contains("direction=\"app\""));
        assert!(encoded.contains("verdict=\"deliver\""));
        assert!(encoded.contains("verdict=\"drop\""));
    }

    #[test]
    fn gauge_set_appears_in_output() {
        let metrics = EnforcerMetrics::new();
        metrics.set_pus_enforced(42);

        let encoded = metrics.encode();
        assert!(encoded.contains("fluxguard_pus_enforced"));
        assert!(encoded.contains("42"));
    }

    #[test]
    fn flow_and_token_counters() {
        let metrics = EnforcerMetrics::new();
        metrics.record_flow("accept");
        metrics.record_flow("reject");
        metrics.record_invalid_token("net");

        let encoded = metrics.encode();
        assert!(encoded.contains("fluxguard_flows"));
        assert!(encoded.contains("action=\"accept\""));
        assert!(encoded.contains("action=\"reject\""));
        assert!(encoded.contains("fluxguard_invalid_tokens"));
    }

    #[test]
    fn policy_operation_counter() {
        let metrics = EnforcerMetrics::new();
        metrics.record_policy_operation("enforce", "success");
        metrics.record_policy_operation("enforce", "failure");

        let encoded = metrics.encode();
        assert!(encoded.contains("fluxguard_policy_operations"));
        assert!(encoded.contains("operation=\"enforce\""));
        assert!(encoded.contains("result=\"success\""));
        assert!(encoded.contains("result=\"failure\""));
    }

    #[test]
    fn metrics_port_trait_impl() {
        let metrics = EnforcerMetrics::new();
        let port: &dyn MetricsPort = &metrics;
        port.record_packet("app", "deliver");
        port.record_invalid_token("net");
        port.record_queue_drop();
        port.record_flow("accept");
        port.record_dns_expansion();
        port.record_dns_expansion_overflow();
        port.set_pus_enforced(3);
        port.record_policy_operation("unenforce", "success");
    }
}
