// Focused sub-traits for recording metrics, grouped by plane.
//
// All methods take `&self`; implementations use interior mutability
// (atomic counters). Defaults are no-ops so test mocks only implement
// what they assert on.

// ── Datapath metrics ───────────────────────────────────────────────

pub trait DatapathMetrics: Send + Sync {
    /// Record a processed packet with direction (app/net) and verdict
    /// (deliver/drop) labels.
    fn record_packet(&self, _direction: &str, _verdict: &str) {}

    /// Record a token that failed to parse or verify.
    fn record_invalid_token(&self, _direction: &str) {}

    /// Record a payload packet dropped due to queue overflow.
    fn record_queue_drop(&self) {}

    /// Record a completed flow verdict (accept/reject).
    fn record_flow(&self, _action: &str) {}

    /// Record a DNS answer expanded into an ACL rule.
    fn record_dns_expansion(&self) {}

    /// Record a DNS expansion skipped because the per-PU bound was hit.
    fn record_dns_expansion_overflow(&self) {}
}

// ── Control-plane metrics ──────────────────────────────────────────

pub trait ControlMetrics: Send + Sync {
    /// Set the number of currently enforced processing units.
    fn set_pus_enforced(&self, _count: u64) {}

    /// Record an enforce/unenforce/update operation and its result.
    fn record_policy_operation(&self, _operation: &str, _result: &str) {}
}

// ── Composite super-trait ──────────────────────────────────────────

/// Unified metrics port. Services accept `Arc<dyn MetricsPort>`; the
/// sub-traits keep test mocks small.
pub trait MetricsPort: DatapathMetrics + ControlMetrics {}

/// Blanket implementation: implementing both sub-traits is enough.
impl<T> MetricsPort for T where T: DatapathMetrics + ControlMetrics {}
