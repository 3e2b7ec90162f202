use thiserror::Error;

use domain::common::error::DomainError;
use domain::connection::error::ConnectionError;
use domain::connection::error::TokenError;

/// Per-packet failures on the data plane.
///
/// Every variant results in a drop of the offending packet only; errors
/// never propagate across flows. Which ones emit a rejection report is
/// decided at the failure site.
#[derive(Debug, Error)]
pub enum DatapathError {
    /// Malformed packet or marker. Dropped without a report.
    #[error("malformed packet: {0}")]
    Protocol(String),

    /// Invalid, expired, or unparseable token.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Token parsed but the selectors rejected the flow.
    #[error("flow rejected by policy {policy_id}")]
    PolicyReject { policy_id: String },

    /// Packet from or to a processing unit we do not enforce.
    #[error("no enforcement context for {0}")]
    NoContext(String),

    /// Required connection state is missing (e.g. SYNACK without SYN).
    #[error("connection state not found")]
    NoState,

    /// Unexpected state transition.
    #[error(transparent)]
    State(#[from] ConnectionError),

    /// A configured service hook refused the packet.
    #[error("service hook rejected packet")]
    ServiceReject,

    /// Raw-socket or conntrack failure; the flow proceeds degraded.
    #[error("system error: {0}")]
    System(String),
}

/// Control-plane failures, returned to the monitor.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("proxy port pool exhausted")]
    PortsExhausted,

    #[error("operation cancelled")]
    Cancelled,
}
