//! Data keys: per-file DEK generation and wrapping under the passphrase KEK

use zeroize::Zeroize;

use crate::encoding;
use crate::error::{CryptoError, CryptoResult};
use crate::provider::{random_array, CryptoProvider};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Size of a wrapped DEK: key bytes plus GCM tag.
pub const WRAPPED_DEK_SIZE: usize = KEY_SIZE + TAG_SIZE;

/// Key-encryption key. Only usable with [`wrap_dek`] / [`unwrap_dek`].
pub struct Kek {
    bytes: [u8; KEY_SIZE],
}

impl Kek {
    pub(crate) fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for Kek {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kek").field("bytes", &"[REDACTED]").finish()
    }
}

/// A per-file 256-bit data encryption key. Zeroized on drop, never serialized.
pub struct Dek {
    bytes: [u8; KEY_SIZE],
}

impl Dek {
    /// Generate a random DEK.
    pub fn generate(provider: &dyn CryptoProvider) -> CryptoResult<Self> {
        random_array::<KEY_SIZE>(provider).map(|bytes| Self { bytes })
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for Dek {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Dek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dek").field("bytes", &"[REDACTED]").finish()
    }
}

/// The only persisted form of a DEK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedDek {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; NONCE_SIZE],
}

impl WrappedDek {
    /// `(wrappedDekB64, wrappedDekIvB64)`
    pub fn to_b64_pair(&self) -> (String, String) {
        (encoding::encode(&self.ciphertext), encoding::encode(&self.iv))
    }

    pub fn from_b64_pair(ciphertext_b64: &str, iv_b64: &str) -> CryptoResult<Self> {
        Ok(Self {
            ciphertext: encoding::decode_field(ciphertext_b64, "wrappedDekB64")?,
            iv: encoding::decode_array::<NONCE_SIZE>(iv_b64, "wrappedDekIvB64")?,
        })
    }
}

/// Wrap `dek` under `kek` with a fresh random IV.
pub fn wrap_dek(provider: &dyn CryptoProvider, dek: &Dek, kek: &Kek) -> CryptoResult<WrappedDek> {
    let (ciphertext, iv) = provider.key_wrap(kek.as_bytes(), dek.as_bytes())?;
    Ok(WrappedDek { ciphertext, iv })
}

/// Unwrap a DEK. Any failure (wrong KEK, tampered bytes, wrong length) is
/// [`CryptoError::UnwrapFailed`], the signal for "incorrect passphrase".
pub fn unwrap_dek(
    provider: &dyn CryptoProvider,
    wrapped: &WrappedDek,
    kek: &Kek,
) -> CryptoResult<Dek> {
    if wrapped.ciphertext.len() != WRAPPED_DEK_SIZE {
        return Err(CryptoError::UnwrapFailed);
    }

    let mut plaintext = provider
        .key_unwrap(kek.as_bytes(), &wrapped.ciphertext, &wrapped.iv)
        .map_err(|_| CryptoError::UnwrapFailed)?;

    if plaintext.len() != KEY_SIZE {
        plaintext.zeroize();
        return Err(CryptoError::UnwrapFailed);
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    Ok(Dek::from_bytes(key_bytes))
}
