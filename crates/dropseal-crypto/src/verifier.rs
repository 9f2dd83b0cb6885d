//! Unlock verifier: the server's stored form of an unlock proof.
//!
//! `verifier = HMAC-SHA-256(server_secret, proof)`. A leaked record store
//! without the secret does not let anyone test proofs offline.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::encoding;
use crate::error::{CryptoError, CryptoResult};

type HmacSha256 = Hmac<Sha256>;

/// Minimum server secret length in bytes.
pub const MIN_SECRET_SIZE: usize = 32;

/// Verifier length in bytes.
pub const VERIFIER_SIZE: usize = 32;

/// Server-held HMAC key. Never leaves the server.
pub struct ServerSecret(Zeroizing<Vec<u8>>);

impl ServerSecret {
    pub fn new(bytes: Vec<u8>) -> CryptoResult<Self> {
        let bytes = Zeroizing::new(bytes);
        if bytes.len() < MIN_SECRET_SIZE {
            return Err(CryptoError::Config(format!(
                "server secret must be at least {MIN_SECRET_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn from_b64(s: &str) -> CryptoResult<Self> {
        Self::new(encoding::decode_field(s.trim(), "server secret")?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for ServerSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSecret")
            .field("len", &self.0.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verifier([u8; VERIFIER_SIZE]);

impl Verifier {
    pub fn as_bytes(&self) -> &[u8; VERIFIER_SIZE] {
        &self.0
    }

    pub fn to_b64(&self) -> String {
        encoding::encode(&self.0)
    }

    pub fn from_b64(s: &str) -> CryptoResult<Self> {
        encoding::decode_array::<VERIFIER_SIZE>(s, "unlockVerifierB64").map(Self)
    }
}

/// Compute the verifier to persist for `proof`.
pub fn compute_verifier(proof: &[u8], secret: &ServerSecret) -> CryptoResult<Verifier> {
    mac(proof, secret).map(Verifier)
}

/// Check `proof` against a stored verifier in constant time.
pub fn verify(proof: &[u8], stored: &[u8], secret: &ServerSecret) -> bool {
    if stored.len() != VERIFIER_SIZE {
        return false;
    }
    match mac(proof, secret) {
        Ok(candidate) => candidate[..].ct_eq(stored).into(),
        Err(_) => false,
    }
}

fn mac(message: &[u8], secret: &ServerSecret) -> CryptoResult<[u8; VERIFIER_SIZE]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| CryptoError::Config(format!("server secret: {e}")))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}
