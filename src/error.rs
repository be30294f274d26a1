//! Domain error types. Connection-level and I/O failures at the
//! composition root stay `anyhow::Error`; these are the typed errors
//! used where callers need to match on a specific failure kind.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file is invalid:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("unknown teletask function code: {0:#04x}")]
    UnknownFunction(u8),
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid mqtt command value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Error)]
pub enum TopicError {
    #[error("malformed topic, expected 5 segments: {0}")]
    Malformed(String),
}
