//! Unified error type for the triple ratchet core.
//!
//! Mirrors the error-kind catalogue, not a type hierarchy: every failure
//! the core can produce is one variant here, so callers match on a single
//! enum instead of threading per-layer error types through the public API.

use thiserror::Error;

/// Errors produced by any layer of the triple ratchet core.
#[derive(Error, Debug)]
pub enum RatchetError {
    #[error("invalid key: {0}")]
    InvalidKey(&'static str),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("wire version too old, X3DH is no longer supported")]
    X3dhNoLongerSupported,

    #[error("duplicate message")]
    DuplicateMessage,

    #[error("session not found")]
    SessionNotFound,

    #[error("invalid session: {0}")]
    InvalidSession(&'static str),

    #[error("untrusted identity")]
    UntrustedIdentity,

    #[error("signature validation failed")]
    SignatureValidation,

    #[error("v4 message missing kyber ciphertext")]
    MissingKyberCiphertext,

    #[error("SPQR epoch out of range: got {got}, current {current}")]
    EpochOutOfRange { got: u64, current: u64 },

    #[error("erroneous SPQR payload data")]
    ErroneousData,

    #[error("SPQR header or ciphertext MAC did not verify")]
    SpqrMacMismatch,

    #[error("unrecognized ciphertext version: {0}")]
    UnrecognizedCiphertextVersion(u8),
}

impl From<crate::crypto::primitives::PrimitiveError> for RatchetError {
    fn from(e: crate::crypto::primitives::PrimitiveError) -> Self {
        RatchetError::InvalidMessage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RatchetError>;
