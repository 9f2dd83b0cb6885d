use dropseal_core::DropsealError;
use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Detailed cryptographic failure.
///
/// Converts into [`DropsealError`] for anything user-facing; that conversion
/// erases which step failed.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid crypto parameters: {0}")]
    Config(String),

    #[error("crypto capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("malformed {field}: {reason}")]
    Encoding { field: &'static str, reason: String },

    #[error("data key unwrap failed: invalid key-encryption key or corrupted data")]
    UnwrapFailed,

    #[error("chunk {index} failed authentication")]
    ChunkAuthentication { index: u32 },

    #[error("ciphertext length mismatch: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("metadata decryption failed")]
    MetadataDecryption,

    /// Only reachable when a single AEAD input exceeds the GCM length limit.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CryptoError> for DropsealError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Config(msg) => DropsealError::Config(msg),
            CryptoError::CapabilityUnavailable(msg) => DropsealError::CapabilityUnavailable(msg),
            CryptoError::UnwrapFailed
            | CryptoError::ChunkAuthentication { .. }
            | CryptoError::MetadataDecryption => DropsealError::Authentication,
            e @ (CryptoError::Encoding { .. } | CryptoError::Truncated { .. }) => {
                DropsealError::Integrity(e.to_string())
            }
            e @ CryptoError::EncryptionFailed => DropsealError::Config(e.to_string()),
            CryptoError::Io(e) => DropsealError::Io(e),
        }
    }
}
