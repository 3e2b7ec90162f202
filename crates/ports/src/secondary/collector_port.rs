use domain::report::entity::{ContainerRecord, FlowRecord};

/// Sink for flow verdicts and processing-unit lifecycle events.
///
/// Collection is fire-and-forget from the datapath's point of view;
/// implementations buffer and aggregate before shipping.
pub trait CollectorPort: Send + Sync {
    fn collect_flow_event(&self, record: FlowRecord);
    fn collect_container_event(&self, record: ContainerRecord);
}
