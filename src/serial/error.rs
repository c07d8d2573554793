// ABOUTME: Error types for serial generation and validation
// ABOUTME: Covers malformed serials and exhausted per-scope sequence capacity

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SerialError {
    #[error("Invalid {tier} serial: '{serial}'")]
    InvalidFormat { tier: &'static str, serial: String },

    #[error("Sequence exhausted for scope '{scope}' (capacity {capacity})")]
    SequenceExhausted { scope: String, capacity: u32 },
}

pub type Result<T> = std::result::Result<T, SerialError>;
