//! Legacy password-protected bundles.
//!
//! These predate end-to-end encryption: the server receives the password
//! itself and compares it against an Argon2id PHC string. They stay readable
//! but are never mixed with the unlock-proof mode.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

use dropseal_core::{DropsealError, DropsealResult};
use dropseal_crypto::provider::random_array;
use dropseal_crypto::CryptoProvider;

/// Argon2id cost parameters for new legacy hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyParams {
    pub mem_cost_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for LegacyParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 19_456,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl LegacyParams {
    fn hasher(&self) -> DropsealResult<Argon2<'static>> {
        let params = Params::new(self.mem_cost_kib, self.time_cost, self.parallelism, None)
            .map_err(|e| DropsealError::Config(format!("invalid Argon2 parameters: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Hash `password` into a PHC string with a fresh 16-byte salt.
pub fn hash_password(
    provider: &dyn CryptoProvider,
    password: &str,
    params: &LegacyParams,
) -> DropsealResult<String> {
    let salt_bytes = random_array::<16>(provider)?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| DropsealError::Config(format!("argon2 salt: {e}")))?;
    let hash = params
        .hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| DropsealError::Config(format!("argon2 hashing failed: {e}")))?;
    Ok(hash.to_string())
}

/// Check `password` against a stored PHC string. Parameters are read from
/// the string itself, so hashes made under older costs keep verifying.
pub fn verify_password(password: &str, phc: &str) -> DropsealResult<bool> {
    let parsed = PasswordHash::new(phc)
        .map_err(|e| DropsealError::Integrity(format!("stored password hash: {e}")))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(DropsealError::Integrity(format!("stored password hash: {e}"))),
    }
}
