// ⛔ Package errors - the structural failures that stop a publish
// The engine itself never fails; these only come from the file boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Snapshot is missing required fields: {}", .0.join(", "))]
    MissingRequiredFields(Vec<String>),

    #[error("Snapshot contains a non-finite number at {0}")]
    NonFiniteNumber(String),

    #[error("Unsafe artifact path: {0}")]
    UnsafePath(String),

    #[error("Digest mismatch for {path}: expected {expected}, found {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Size mismatch for {path}: expected {expected} bytes, found {actual}")]
    SizeMismatch { path: String, expected: u64, actual: u64 },

    #[error("Signature check failed ({0})")]
    BadSignature(String),

    #[error("Not a publish package: kind is {0:?}")]
    WrongKind(String),

    #[error("Unsupported package version: {0}")]
    UnsupportedVersion(String),

    #[error("Publish check {check} failed: {detail}")]
    CheckFailed { check: String, detail: String },

    #[error("Invalid signing key")]
    InvalidKey,
}
