//! Cryptographic capability interface.
//!
//! Every primitive the envelope protocol needs goes through [`CryptoProvider`]
//! so that an environment without a secure RNG or AEAD support fails with
//! [`CryptoError::CapabilityUnavailable`] instead of falling back to anything
//! weaker. [`SystemProvider`] is the production implementation.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, NONCE_SIZE};

/// AEAD tag verification failed. Callers map this to their own error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AeadRejected;

pub trait CryptoProvider: Send + Sync {
    /// Fill `buf` from a cryptographically secure source.
    fn fill_random(&self, buf: &mut [u8]) -> CryptoResult<()>;

    /// PBKDF2-HMAC-SHA-256 into `out` (any length).
    fn pbkdf2_sha256(
        &self,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        out: &mut [u8],
    ) -> CryptoResult<()>;

    /// AES-256-GCM. Output is `ciphertext || tag`.
    fn aead_encrypt(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        plaintext: &[u8],
    ) -> CryptoResult<Vec<u8>>;

    fn aead_decrypt(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, AeadRejected>;

    /// Encrypt raw key bytes under `kek` with a fresh random IV.
    fn key_wrap(
        &self,
        kek: &[u8; KEY_SIZE],
        key: &[u8; KEY_SIZE],
    ) -> CryptoResult<(Vec<u8>, [u8; NONCE_SIZE])> {
        let iv = random_array::<NONCE_SIZE>(self)?;
        let wrapped = self.aead_encrypt(kek, &iv, &[], key)?;
        Ok((wrapped, iv))
    }

    fn key_unwrap(
        &self,
        kek: &[u8; KEY_SIZE],
        wrapped: &[u8],
        iv: &[u8; NONCE_SIZE],
    ) -> Result<Vec<u8>, AeadRejected> {
        self.aead_decrypt(kek, iv, &[], wrapped)
    }
}

/// Draw `N` random bytes from `provider`.
pub fn random_array<const N: usize>(
    provider: &(impl CryptoProvider + ?Sized),
) -> CryptoResult<[u8; N]> {
    let mut out = [0u8; N];
    provider.fill_random(&mut out)?;
    Ok(out)
}

/// OS entropy + RustCrypto PBKDF2 / AES-256-GCM.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProvider;

impl CryptoProvider for SystemProvider {
    fn fill_random(&self, buf: &mut [u8]) -> CryptoResult<()> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| CryptoError::CapabilityUnavailable(format!("secure random source: {e}")))
    }

    fn pbkdf2_sha256(
        &self,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        out: &mut [u8],
    ) -> CryptoResult<()> {
        if iterations == 0 {
            return Err(CryptoError::Config("PBKDF2 iteration count must be non-zero".into()));
        }
        pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, out);
        Ok(())
    }

    fn aead_encrypt(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        plaintext: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let cipher = Aes256Gcm::new(key.into());
        cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    fn aead_decrypt(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, AeadRejected> {
        let cipher = Aes256Gcm::new(key.into());
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| AeadRejected)
    }
}
