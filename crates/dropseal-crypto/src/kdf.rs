//! Key derivation: passphrase → {KEK, metadata key} and passphrase → unlock proof
//!
//! Two independent PBKDF2-HMAC-SHA-256 derivations, each with its own domain
//! label prepended to the passphrase and its own salt. The content derivation
//! produces 96 bytes in a single call and is sliced into fixed offsets.

use std::time::Instant;

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use dropseal_core::config::check_iterations;

use crate::encoding;
use crate::error::{CryptoError, CryptoResult};
use crate::keys::Kek;
use crate::metadata::MetadataKey;
use crate::provider::{random_array, CryptoProvider};
use crate::KEY_SIZE;

pub use dropseal_core::config::{DEFAULT_ITERATIONS, MAX_ITERATIONS, MIN_ITERATIONS};

/// Salt length in bytes (128-bit)
pub const SALT_SIZE: usize = 16;

/// Domain label for the content-key derivation.
pub const CONTENT_LABEL: &[u8] = b"dropseal/content/v1";
/// Domain label for the unlock-proof derivation.
pub const UNLOCK_LABEL: &[u8] = b"dropseal/unlock/v1";

const CONTENT_OUTPUT_SIZE: usize = 3 * KEY_SIZE;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    pub fn generate(provider: &dyn CryptoProvider) -> CryptoResult<Self> {
        random_array::<SALT_SIZE>(provider).map(Self)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }

    pub fn to_b64(&self) -> String {
        encoding::encode(&self.0)
    }

    pub fn from_b64(s: &str, field: &'static str) -> CryptoResult<Self> {
        encoding::decode_array::<SALT_SIZE>(s, field).map(Self)
    }
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Salt({})", self.to_b64())
    }
}

/// The encryption/unlock salt pair of one bundle. The two always differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleSalts {
    encryption: Salt,
    unlock: Salt,
}

impl BundleSalts {
    /// Draw a fresh pair, redrawing the unlock salt on the (negligible) chance of a collision.
    pub fn generate(provider: &dyn CryptoProvider) -> CryptoResult<Self> {
        let encryption = Salt::generate(provider)?;
        loop {
            let unlock = Salt::generate(provider)?;
            if let Ok(salts) = Self::new(encryption, unlock) {
                return Ok(salts);
            }
        }
    }

    pub fn new(encryption: Salt, unlock: Salt) -> CryptoResult<Self> {
        if bool::from(encryption.0.ct_eq(&unlock.0)) {
            return Err(CryptoError::Config(
                "encryption salt and unlock salt must differ".into(),
            ));
        }
        Ok(Self { encryption, unlock })
    }

    pub fn from_b64(encryption_b64: &str, unlock_b64: &str) -> CryptoResult<Self> {
        Self::new(
            Salt::from_b64(encryption_b64, "encryptionSaltB64")?,
            Salt::from_b64(unlock_b64, "unlockSaltB64")?,
        )
    }

    pub fn encryption(&self) -> &Salt {
        &self.encryption
    }

    pub fn unlock(&self) -> &Salt {
        &self.unlock
    }
}

/// The two capability-bearing keys derived from one passphrase.
pub struct ContentKeys {
    pub kek: Kek,
    pub metadata_key: MetadataKey,
}

impl std::fmt::Debug for ContentKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKeys")
            .field("kek", &self.kek)
            .field("metadata_key", &self.metadata_key)
            .finish()
    }
}

/// 256-bit proof of passphrase knowledge. The only authentication artifact a
/// client ever sends; it cannot be used to decrypt anything.
#[derive(Clone)]
pub struct UnlockProof {
    bytes: [u8; KEY_SIZE],
}

impl UnlockProof {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn to_b64(&self) -> String {
        encoding::encode(&self.bytes)
    }

    pub fn from_b64(s: &str) -> CryptoResult<Self> {
        encoding::decode_array::<KEY_SIZE>(s, "unlockProof").map(Self::from_bytes)
    }
}

impl Drop for UnlockProof {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for UnlockProof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockProof")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the KEK and metadata key from the passphrase and encryption salt.
///
/// One PBKDF2 call produces 96 bytes: `[0..32)` KEK, `[32..64)` metadata key,
/// `[64..96)` reserved and discarded.
pub fn derive_content_keys(
    provider: &dyn CryptoProvider,
    passphrase: &SecretString,
    encryption_salt: &Salt,
    iterations: u32,
) -> CryptoResult<ContentKeys> {
    check_iterations(iterations).map_err(|e| CryptoError::Config(e.to_string()))?;

    let started = Instant::now();
    let input = labelled(CONTENT_LABEL, passphrase);
    let mut okm = Zeroizing::new([0u8; CONTENT_OUTPUT_SIZE]);
    provider.pbkdf2_sha256(&input, encryption_salt.as_bytes(), iterations, &mut okm[..])?;

    let mut kek = [0u8; KEY_SIZE];
    let mut metadata = [0u8; KEY_SIZE];
    kek.copy_from_slice(&okm[..KEY_SIZE]);
    metadata.copy_from_slice(&okm[KEY_SIZE..2 * KEY_SIZE]);

    tracing::debug!(
        iterations,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "derived content keys"
    );

    Ok(ContentKeys {
        kek: Kek::from_bytes(kek),
        metadata_key: MetadataKey::from_bytes(metadata),
    })
}

/// Derive the unlock proof from the passphrase and the unlock salt.
pub fn derive_unlock_proof(
    provider: &dyn CryptoProvider,
    passphrase: &SecretString,
    unlock_salt: &Salt,
    iterations: u32,
) -> CryptoResult<UnlockProof> {
    check_iterations(iterations).map_err(|e| CryptoError::Config(e.to_string()))?;

    let started = Instant::now();
    let input = labelled(UNLOCK_LABEL, passphrase);
    let mut proof = [0u8; KEY_SIZE];
    provider.pbkdf2_sha256(&input, unlock_salt.as_bytes(), iterations, &mut proof)?;

    tracing::debug!(
        iterations,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "derived unlock proof"
    );

    Ok(UnlockProof::from_bytes(proof))
}

fn labelled(label: &[u8], passphrase: &SecretString) -> Zeroizing<Vec<u8>> {
    let secret = passphrase.expose_secret().as_bytes();
    let mut input = Zeroizing::new(Vec::with_capacity(label.len() + secret.len()));
    input.extend_from_slice(label);
    input.extend_from_slice(secret);
    input
}
