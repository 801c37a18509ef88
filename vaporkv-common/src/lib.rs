use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Strict upper bound on record id and idempotency token length in bytes.
/// Both must be strictly shorter than this (`len < MAX_ID_SIZE`).
pub const MAX_ID_SIZE: usize = 64;

/// Maximum size of a single record's data in bytes (inclusive).
pub const MAX_DATA_SIZE: usize = 1024;

/// Error types for VaporKV client operations
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaporKvError {
    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("sealed value is {0} bytes, exceeding the {1} byte record limit")]
    ValueTooLarge(usize, usize),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("HTTP {0}: {1}")]
    HttpError(u16, String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("malformed server response: {0}")]
    MalformedResponse(String),
}

/// Result type for VaporKV operations
pub type Result<T> = std::result::Result<T, VaporKvError>;

/// Body of a successful `GET /rec/{record_id}/{record_version}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordResponse {
    pub record_id: String,
    pub record_version: u64,
    pub value: String,
}

/// Body of a successful `POST /rec/{record_id}/NEWEST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    pub record_id: String,
    pub record_version: u64,
}

/// JSON body attached to 4xx/5xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
