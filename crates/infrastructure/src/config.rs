//! Enforcer configuration: structs, parsing, and validation.
//!
//! Sections mirror the runtime knobs of the datapath
//! (`application::datapath::DatapathConfig`), the DNS observer, and the
//! controller's proxy-port pool; the process entry point maps them over
//! after loading.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    DEFAULT_CONN_MARK, DEFAULT_CONNECTION_TTL_SECS, DEFAULT_DNS_MAX_EXPANDED_RULES,
    DEFAULT_DNS_MAX_SESSIONS, DEFAULT_DNS_SESSION_TTL_SECS, DEFAULT_PROXY_PORT_COUNT,
    DEFAULT_PROXY_PORT_START, DEFAULT_QUEUE_LIMIT,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("validation failed for {field}: {message}")]
    Validation { field: String, message: String },
}

fn validation(field: &str, message: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.to_string(),
        message: message.to_string(),
    }
}

// ── Logging knobs ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnforcerConfig {
    pub enforcer: EnforcerInfo,

    #[serde(default)]
    pub datapath: DatapathSection,

    #[serde(default)]
    pub dns: DnsSection,

    #[serde(default)]
    pub proxy: ProxySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnforcerInfo {
    /// Identity of this enforcer instance in reports.
    pub id: String,

    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Log every packet decision at debug level. Very noisy.
    #[serde(default)]
    pub packet_logs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatapathSection {
    #[serde(default = "default_mutual_authorization")]
    pub mutual_authorization: bool,

    #[serde(default = "default_connection_ttl_secs")]
    pub connection_ttl_secs: u64,

    #[serde(default = "default_queue_limit")]
    pub queue_limit: usize,

    #[serde(default = "default_conn_mark")]
    pub conn_mark: u32,
}

fn default_mutual_authorization() -> bool {
    true
}

fn default_connection_ttl_secs() -> u64 {
    DEFAULT_CONNECTION_TTL_SECS
}

fn default_queue_limit() -> usize {
    DEFAULT_QUEUE_LIMIT
}

fn default_conn_mark() -> u32 {
    DEFAULT_CONN_MARK
}

impl Default for DatapathSection {
    fn default() -> Self {
        Self {
            mutual_authorization: default_mutual_authorization(),
            connection_ttl_secs: default_connection_ttl_secs(),
            queue_limit: default_queue_limit(),
            conn_mark: default_conn_mark(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsSection {
    #[serde(default = "default_dns_session_ttl_secs")]
    pub session_ttl_secs: u64,

    #[serde(default = "default_dns_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "default_dns_max_expanded_rules")]
    pub max_expanded_rules: usize,
}

fn default_dns_session_ttl_secs() -> u64 {
    DEFAULT_DNS_SESSION_TTL_SECS
}

fn default_dns_max_sessions() -> usize {
    DEFAULT_DNS_MAX_SESSIONS
}

fn default_dns_max_expanded_rules() -> usize {
    DEFAULT_DNS_MAX_EXPANDED_RULES
}

impl Default for DnsSection {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_dns_session_ttl_secs(),
            max_sessions: default_dns_max_sessions(),
            max_expanded_rules: default_dns_max_expanded_rules(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxySection {
    #[serde(default = "default_proxy_port_start")]
    pub port_start: u16,

    #[serde(default = "default_proxy_port_count")]
    pub port_count: u16,
}

fn default_proxy_port_start() -> u16 {
    DEFAULT_PROXY_PORT_START
}

fn default_proxy_port_count() -> u16 {
    DEFAULT_PROXY_PORT_COUNT
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            port_start: default_proxy_port_start(),
            port_count: default_proxy_port_count(),
        }
    }
}

impl EnforcerConfig {
    /// Load config from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config after deserialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enforcer.id.is_empty() {
            return Err(validation("enforcer.id", "must not be empty"));
        }
        if self.datapath.connection_ttl_secs == 0 {
            return Err(validation("datapath.connection_ttl_secs", "must be > 0"));
        }
        if self.datapath.queue_limit == 0 || self.datapath.queue_limit > 4096 {
            return Err(validation("datapath.queue_limit", "must be in 1..=4096"));
        }
        if self.datapath.conn_mark == 0 {
            return Err(validation("datapath.conn_mark", "must be non-zero"));
        }
        if self.dns.session_ttl_secs == 0 {
            return Err(validation("dns.session_ttl_secs", "must be > 0"));
        }
        if self.dns.max_sessions == 0 {
            return Err(validation("dns.max_sessions", "must be > 0"));
        }
        if self.proxy.port_count == 0 {
            return Err(validation("proxy.port_count", "must be > 0"));
        }
        if u32::from(self.proxy.port_start) + u32::from(self.proxy.port_count) > 65535 {
            return Err(validation("proxy.port_count", "pool exceeds the port space"));
        }
        Ok(())
    }

    pub fn connection_ttl(&self) -> Duration {
        Duration::from_secs(self.datapath.connection_ttl_secs)
    }

    pub fn dns_session_ttl(&self) -> Duration {
        Duration::from_secs(self.dns.session_ttl_secs)
    }
}
