use std::io;

use thiserror::Error;

pub use crate::chain::ChainError;

/// Possible cryptographic failure conditions.
///
/// Every failure path in this crate is distinguishable by kind; no operation
/// folds a cryptographic failure into a success-shaped default value.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Crypto primitive uses a version this library doesn't recognize (or one
    /// it no longer accepts).
    #[error("crypto version {0} not supported")]
    UnsupportedVersion(u8),
    /// Could not decrypt: wrong key, wrong nonce, or corrupted ciphertext.
    #[error("could not decrypt with key")]
    DecryptFailed,
    /// A provided cryptographic key could not be decoded into a usable key.
    #[error("crypto key encoding is invalid")]
    BadKey,
    /// A signature failed verification, or its bytes could not be decoded.
    #[error("signature verification failed")]
    SignatureFailed,
    /// The provided data for encode/decode wasn't the correct length.
    #[error("bad length at {step}: expected {expected}, got {actual}")]
    BadLength {
        step: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A payload, or a length-prefixed field, exceeded its declared maximum.
    #[error("size limit exceeded at {step}: max {max}, got {actual}")]
    SizeLimit {
        step: &'static str,
        max: usize,
        actual: usize,
    },
    /// The data format doesn't match spec.
    #[error("format of data does not match specification: {0}")]
    BadFormat(&'static str),
    /// A key chain failed validation.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Decode/encode error occurred.
    #[error(transparent)]
    Io(#[from] io::Error),
}
