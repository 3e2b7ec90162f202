use thiserror::Error;

use crate::policy::error::PolicyError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AclError {
    #[error("invalid CIDR: {spec}")]
    InvalidCidr { spec: String },

    #[error("invalid prefix length: /{len}")]
    InvalidPrefixLen { len: u8 },

    #[error(transparent)]
    Port(#[from] PolicyError),
}
