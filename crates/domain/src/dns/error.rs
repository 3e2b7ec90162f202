use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DnsError {
    #[error("truncated DNS payload: need {need} bytes, got {got}")]
    TruncatedPayload { need: usize, got: usize },

    #[error("malformed DNS packet: {0}")]
    MalformedPacket(String),

    #[error("too many records: {count} (max {max})")]
    TooManyRecords { count: u16, max: u16 },

    #[error("not a DNS response")]
    NotAResponse,
}
