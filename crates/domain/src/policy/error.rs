use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("selector clause key must not be empty")]
    EmptyClauseKey,

    #[error("operator {0} requires at least one value")]
    MissingValues(&'static str),

    #[error("operator {0} must not carry values")]
    UnexpectedValues(&'static str),

    #[error("invalid port range: {spec}")]
    InvalidPortRange { spec: String },
}
