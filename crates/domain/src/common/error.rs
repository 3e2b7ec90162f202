use thiserror::Error;

use crate::acls::error::AclError;
use crate::connection::error::{ConnectionError, TokenError};
use crate::dns::error::DnsError;
use crate::policy::error::PolicyError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("processing unit not found: {0}")]
    ContextNotFound(String),

    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("engine error: {0}")]
    EngineError(String),
}

impl From<PolicyError> for DomainError {
    fn from(err: PolicyError) -> Self {
        Self::InvalidRule(err.to_string())
    }
}

impl From<AclError> for DomainError {
    fn from(err: AclError) -> Self {
        Self::InvalidRule(err.to_string())
    }
}

impl From<DnsError> for DomainError {
    fn from(err: DnsError) -> Self {
        Self::EngineError(err.to_string())
    }
}

impl From<ConnectionError> for DomainError {
    fn from(err: ConnectionError) -> Self {
        Self::EngineError(err.to_string())
    }
}

impl From<TokenError> for DomainError {
    fn from(err: TokenError) -> Self {
        Self::EngineError(err.to_string())
    }
}
