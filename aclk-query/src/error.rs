//! Errors raised while queueing or executing ACLK queries.
//!
//! None of these escape a single record: the dispatcher logs them and
//! drops the record, the worker moves on to the next one.

use crate::record::Command;

#[derive(Debug, thiserror::Error)]
pub enum AclkError {
    #[error("ACLK is not connected, command not accepted")]
    NotConnected,
    #[error("{command} needs host pointer")]
    MissingHost { command: Command },
    #[error("not allowed to send {command} in ACLK version before {required} (negotiated {negotiated})")]
    VersionTooLow {
        command: Command,
        required: u32,
        negotiated: u32,
    },
    #[error("unsupported query: {0}")]
    UnsupportedQuery(String),
    #[error("unknown chart: {0}")]
    UnknownChart(String),
    #[error("error compressing body: {0}")]
    Compression(#[source] std::io::Error),
    #[error("failed to spawn query thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AclkError>;
