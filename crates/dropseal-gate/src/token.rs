//! Short-lived access tokens issued after a successful unlock.
//!
//! ```text
//! token = b64(claims_json) "." b64(HMAC-SHA-256(token_key, b64(claims_json)))
//! token_key = HKDF-SHA-256(ikm = server secret, info = "dropseal-access-token")
//! ```
//!
//! The token key is derived, so a token MAC never doubles as an unlock
//! verifier even though both come from the same server secret.

use std::time::Duration;

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use dropseal_core::types::UnlockGrant;
use dropseal_core::{DropsealError, DropsealResult};
use dropseal_crypto::encoding;
use dropseal_crypto::ServerSecret;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_INFO: &[u8] = b"dropseal-access-token";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Claims {
    bundle: String,
    exp: u64,
}

pub struct TokenSigner {
    key: Zeroizing<[u8; 32]>,
    ttl: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: &ServerSecret, ttl: Duration) -> DropsealResult<Self> {
        if ttl.is_zero() {
            return Err(DropsealError::Config("unlock.token_ttl_secs must be non-zero".into()));
        }
        let hk = Hkdf::<Sha256>::new(None, secret.as_bytes());
        let mut key = Zeroizing::new([0u8; 32]);
        hk.expand(TOKEN_INFO, &mut key[..])
            .map_err(|e| DropsealError::Config(format!("token key derivation: {e}")))?;
        Ok(Self { key, ttl })
    }

    /// Issue a token for `bundle_id` valid until `now_unix + ttl`.
    pub fn issue(&self, bundle_id: &str, now_unix: u64) -> DropsealResult<UnlockGrant> {
        let claims = Claims {
            bundle: bundle_id.to_string(),
            exp: now_unix.saturating_add(self.ttl.as_secs()),
        };
        let json = serde_json::to_vec(&claims)
            .map_err(|e| DropsealError::Config(format!("token claims: {e}")))?;
        let body = encoding::encode(&json);
        let tag = self.mac(body.as_bytes())?;
        Ok(UnlockGrant {
            token: format!("{body}.{}", encoding::encode(&tag)),
            expires_at: claims.exp,
        })
    }

    /// Check signature, bundle and expiry. Every failure is
    /// [`DropsealError::Authentication`].
    pub fn validate(&self, token: &str, bundle_id: &str, now_unix: u64) -> DropsealResult<()> {
        let (body, tag_b64) = token.split_once('.').ok_or(DropsealError::Authentication)?;
        let tag = encoding::decode(tag_b64).map_err(|_| DropsealError::Authentication)?;
        let expected = self.mac(body.as_bytes())?;
        if tag.len() != expected.len() || !bool::from(expected[..].ct_eq(&tag[..])) {
            tracing::debug!("access token signature mismatch");
            return Err(DropsealError::Authentication);
        }

        let json = encoding::decode(body).map_err(|_| DropsealError::Authentication)?;
        let claims: Claims =
            serde_json::from_slice(&json).map_err(|_| DropsealError::Authentication)?;
        if claims.bundle != bundle_id {
            tracing::debug!("access token presented for another bundle");
            return Err(DropsealError::Authentication);
        }
        if now_unix >= claims.exp {
            tracing::debug!(exp = claims.exp, "access token expired");
            return Err(DropsealError::Authentication);
        }
        Ok(())
    }

    fn mac(&self, message: &[u8]) -> DropsealResult<[u8; 32]> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key[..])
            .map_err(|e| DropsealError::Config(format!("token key: {e}")))?;
        mac.update(message);
        Ok(mac.finalize().into_bytes().into())
    }
}
