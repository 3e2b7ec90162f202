pub mod collector_port;
pub mod conntrack_port;
pub mod metrics_port;
pub mod packet_port;
pub mod service_port;
pub mod token_port;
