//! Records persisted by the metadata store and carried over the transport.
//!
//! Field names are fixed for interoperability: every binary field is a
//! URL-safe, unpadded base64 string and the JSON keys are camelCase
//! (`encryptionSaltB64`, `wrappedDekIvB64`, `originalSize`, ...).

use serde::{Deserialize, Serialize};

use crate::error::{DropsealError, DropsealResult};

/// How a bundle is protected. The variants are mutually exclusive: an
/// encrypted bundle never accepts a plaintext passphrase and a legacy
/// password bundle never accepts an unlock proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum BundleAccess {
    /// No protection
    Open,
    /// Legacy password bundle: server stores an Argon2id PHC string.
    #[serde(rename_all = "camelCase")]
    Password { password_hash: String },
    /// End-to-end encrypted bundle with a zero-knowledge unlock proof.
    Encrypted(EncryptionParams),
}

/// Per-bundle key derivation and chunking parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionParams {
    pub encryption_salt_b64: String,
    pub unlock_salt_b64: String,
    pub encryption_iterations: u32,
    pub encryption_chunk_size: u32,
    /// Keyed hash of the unlock proof. Never the proof itself.
    pub unlock_verifier_b64: String,
}

/// One bundle: shared parameters plus its files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleRecord {
    pub bundle_id: String,
    pub access: BundleAccess,
    /// Unix seconds
    pub created_at: u64,
    /// Unix seconds; `None` keeps the bundle until deleted explicitly
    pub expires_at: Option<u64>,
    pub files: Vec<FileRecord>,
}

/// Per-file envelope artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Object storage key of the ciphertext blob
    pub content_key: String,
    pub wrapped_dek_b64: String,
    pub wrapped_dek_iv_b64: String,
    pub encrypted_metadata_b64: String,
    pub encrypted_metadata_iv_b64: String,
    pub base_nonce_b64: String,
    /// Plaintext length, needed to size the last chunk
    pub original_size: u64,
}

impl BundleRecord {
    /// Encryption parameters, or an error for non-encrypted bundles.
    pub fn encryption(&self) -> DropsealResult<&EncryptionParams> {
        match &self.access {
            BundleAccess::Encrypted(params) => Ok(params),
            _ => Err(DropsealError::InvalidRequest(format!(
                "bundle {} is not end-to-end encrypted",
                self.bundle_id
            ))),
        }
    }

    pub fn is_expired(&self, now_unix: u64) -> bool {
        self.expires_at.is_some_and(|exp| now_unix >= exp)
    }

    pub fn to_json(&self) -> DropsealResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| DropsealError::Storage(format!("bundle record serialization: {e}")))
    }

    pub fn from_json(data: &[u8]) -> DropsealResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| DropsealError::Integrity(format!("bundle record deserialization: {e}")))
    }
}

/// Client→server unlock request.
///
/// Exactly one of the two fields must be present; see [`UnlockRequest::credential`].
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_proof: Option<String>,
    /// Legacy non-encrypted bundles only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

/// The single credential carried by an [`UnlockRequest`].
pub enum UnlockCredential<'a> {
    Proof(&'a str),
    Passphrase(&'a str),
}

impl UnlockRequest {
    pub fn with_proof(proof_b64: impl Into<String>) -> Self {
        Self {
            unlock_proof: Some(proof_b64.into()),
            passphrase: None,
        }
    }

    pub fn with_passphrase(passphrase: impl Into<String>) -> Self {
        Self {
            unlock_proof: None,
            passphrase: Some(passphrase.into()),
        }
    }

    pub fn credential(&self) -> DropsealResult<UnlockCredential<'_>> {
        match (&self.unlock_proof, &self.passphrase) {
            (Some(proof), None) => Ok(UnlockCredential::Proof(proof)),
            (None, Some(pass)) => Ok(UnlockCredential::Passphrase(pass)),
            (Some(_), Some(_)) => Err(DropsealError::InvalidRequest(
                "unlockProof and passphrase are mutually exclusive".into(),
            )),
            (None, None) => Err(DropsealError::InvalidRequest(
                "either unlockProof or passphrase is required".into(),
            )),
        }
    }
}

impl std::fmt::Debug for UnlockRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockRequest")
            .field("unlock_proof", &self.unlock_proof.as_ref().map(|_| "[REDACTED]"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Successful unlock: an opaque, short-lived capability token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockGrant {
    pub token: String,
    /// Unix seconds
    pub expires_at: u64,
}
