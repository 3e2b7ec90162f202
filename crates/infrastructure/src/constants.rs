//! Default tunables for the enforcer runtime.

/// TTL of connection-table entries without handshake progress.
pub const DEFAULT_CONNECTION_TTL_SECS: u64 = 60;

/// Per-connection payload queue bound.
pub const DEFAULT_QUEUE_LIMIT: usize = 64;

/// Conntrack mark installed on authorized flows.
pub const DEFAULT_CONN_MARK: u32 = 0x1111;

/// TTL of DNS request sessions awaiting a response.
pub const DEFAULT_DNS_SESSION_TTL_SECS: u64 = 30;

/// Bound on concurrently tracked DNS request sessions.
pub const DEFAULT_DNS_MAX_SESSIONS: usize = 1024;

/// Per-PU bound on DNS-expanded ACL rules.
pub const DEFAULT_DNS_MAX_EXPANDED_RULES: usize = 4096;

/// First port of the proxy port pool.
pub const DEFAULT_PROXY_PORT_START: u16 = 20000;

/// Size of the proxy port pool.
pub const DEFAULT_PROXY_PORT_COUNT: u16 = 1000;
