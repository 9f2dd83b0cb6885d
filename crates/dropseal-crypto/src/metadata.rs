//! Per-file metadata encryption
//!
//! `{filename, mimetype, size}` is serialized as compact JSON and sealed in a
//! single AES-256-GCM shot under the bundle's metadata key with a fresh IV.
//! The server never sees file names or types.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::encoding;
use crate::error::{CryptoError, CryptoResult};
use crate::provider::{random_array, CryptoProvider};
use crate::{KEY_SIZE, NONCE_SIZE};

/// Key for the metadata cipher, derived alongside the KEK.
pub struct MetadataKey {
    bytes: [u8; KEY_SIZE],
}

impl MetadataKey {
    pub(crate) fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MetadataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MetadataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub filename: String,
    pub mimetype: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMetadata {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; NONCE_SIZE],
}

impl EncryptedMetadata {
    /// `(encryptedMetadataB64, encryptedMetadataIvB64)`
    pub fn to_b64_pair(&self) -> (String, String) {
        (encoding::encode(&self.ciphertext), encoding::encode(&self.iv))
    }

    pub fn from_b64_pair(ciphertext_b64: &str, iv_b64: &str) -> CryptoResult<Self> {
        Ok(Self {
            ciphertext: encoding::decode_field(ciphertext_b64, "encryptedMetadataB64")?,
            iv: encoding::decode_array::<NONCE_SIZE>(iv_b64, "encryptedMetadataIvB64")?,
        })
    }
}

pub fn encrypt_metadata(
    provider: &dyn CryptoProvider,
    metadata: &FileMetadata,
    key: &MetadataKey,
) -> CryptoResult<EncryptedMetadata> {
    let mut json = serde_json::to_vec(metadata)
        .map_err(|e| CryptoError::Config(format!("metadata serialization: {e}")))?;
    let iv = random_array::<NONCE_SIZE>(provider)?;
    let result = provider.aead_encrypt(key.as_bytes(), &iv, &[], &json);
    json.zeroize();
    Ok(EncryptedMetadata {
        ciphertext: result?,
        iv,
    })
}

/// Decrypt and parse. Tag failure and malformed JSON are both
/// [`CryptoError::MetadataDecryption`].
pub fn decrypt_metadata(
    provider: &dyn CryptoProvider,
    encrypted: &EncryptedMetadata,
    key: &MetadataKey,
) -> CryptoResult<FileMetadata> {
    let mut json = provider
        .aead_decrypt(key.as_bytes(), &encrypted.iv, &[], &encrypted.ciphertext)
        .map_err(|_| CryptoError::MetadataDecryption)?;
    let parsed = serde_json::from_slice(&json).map_err(|_| CryptoError::MetadataDecryption);
    json.zeroize();
    parsed
}
