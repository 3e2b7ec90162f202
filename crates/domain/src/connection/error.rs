use thiserror::Error;

use super::entity::ConnState;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("backward state transition: {from} -> {to}")]
    BackwardTransition { from: ConnState, to: ConnState },
}

/// Failures surfaced by the token accessor.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("token signature verification failed")]
    Signature,

    #[error("token carries no claims")]
    EmptyClaims,

    #[error("token expired")]
    Expired,
}
