//! Unlock gate: credential resolution → rate limit → verification → token.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use dropseal_core::config::{expand_tilde, UnlockConfig};
use dropseal_core::types::{BundleAccess, BundleRecord, UnlockCredential, UnlockGrant, UnlockRequest};
use dropseal_core::{DropsealError, DropsealResult};
use dropseal_crypto::provider::random_array;
use dropseal_crypto::{compute_verifier, encoding, verifier, CryptoProvider, ServerSecret, UnlockProof, Verifier};

use crate::legacy;
use crate::rate_limit::{AttemptKey, AttemptStore, MemoryAttemptStore, RateLimitPolicy};
use crate::token::TokenSigner;

/// What the request must be checked against, resolved before any attempt is
/// counted.
enum Check<'a> {
    Proof {
        proof: UnlockProof,
        stored: Verifier,
    },
    Password {
        password: Zeroizing<String>,
        phc: &'a str,
    },
}

pub struct UnlockGate {
    secret: ServerSecret,
    signer: TokenSigner,
    attempts: Arc<dyn AttemptStore>,
}

impl std::fmt::Debug for UnlockGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockGate")
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

impl UnlockGate {
    /// Gate with an in-process attempt store.
    pub fn new(secret: ServerSecret, config: &UnlockConfig) -> DropsealResult<Self> {
        let policy = RateLimitPolicy::from_config(config)?;
        Self::with_store(
            secret,
            Duration::from_secs(config.token_ttl_secs),
            Arc::new(MemoryAttemptStore::new(policy)),
        )
    }

    pub fn with_store(
        secret: ServerSecret,
        token_ttl: Duration,
        attempts: Arc<dyn AttemptStore>,
    ) -> DropsealResult<Self> {
        let signer = TokenSigner::new(&secret, token_ttl)?;
        Ok(Self {
            secret,
            signer,
            attempts,
        })
    }

    pub fn attempts(&self) -> Arc<dyn AttemptStore> {
        Arc::clone(&self.attempts)
    }

    /// Verifier to persist for a new encrypted bundle.
    pub fn enroll(&self, proof_b64: &str) -> DropsealResult<String> {
        let proof = UnlockProof::from_b64(proof_b64)
            .map_err(|e| DropsealError::InvalidRequest(e.to_string()))?;
        Ok(compute_verifier(proof.as_bytes(), &self.secret)?.to_b64())
    }

    /// Run one unlock attempt for `client` against `record`.
    pub async fn unlock(
        &self,
        record: &BundleRecord,
        client: &str,
        request: &UnlockRequest,
    ) -> DropsealResult<UnlockGrant> {
        let now_unix = unix_now();
        if record.is_expired(now_unix) {
            return Err(DropsealError::InvalidRequest(format!(
                "bundle {} has expired",
                record.bundle_id
            )));
        }

        let check = match &record.access {
            BundleAccess::Open => {
                debug!(bundle = %record.bundle_id, "open bundle, no unlock needed");
                return self.signer.issue(&record.bundle_id, now_unix);
            }
            BundleAccess::Encrypted(params) => match request.credential()? {
                UnlockCredential::Proof(proof_b64) => Check::Proof {
                    proof: UnlockProof::from_b64(proof_b64)
                        .map_err(|e| DropsealError::InvalidRequest(e.to_string()))?,
                    stored: Verifier::from_b64(&params.unlock_verifier_b64)?,
                },
                UnlockCredential::Passphrase(_) => {
                    return Err(DropsealError::InvalidRequest(
                        "encrypted bundles accept an unlock proof, never a passphrase".into(),
                    ))
                }
            },
            BundleAccess::Password { password_hash } => match request.credential()? {
                UnlockCredential::Passphrase(pw) => Check::Password {
                    password: Zeroizing::new(pw.to_string()),
                    phc: password_hash,
                },
                UnlockCredential::Proof(_) => {
                    return Err(DropsealError::InvalidRequest(
                        "password bundles do not accept an unlock proof".into(),
                    ))
                }
            },
        };

        let key = AttemptKey::new(&record.bundle_id, client);
        let remaining = match self
            .attempts
            .check_and_increment(&key, Instant::now())
            .into_result()
        {
            Ok(remaining) => remaining,
            Err(e) => {
                warn!(bundle = %record.bundle_id, client, "unlock attempts exhausted");
                return Err(e);
            }
        };

        let ok = match check {
            Check::Proof { proof, stored } => {
                verifier::verify(proof.as_bytes(), stored.as_bytes(), &self.secret)
            }
            Check::Password { password, phc } => {
                let phc = phc.to_string();
                tokio::task::spawn_blocking(move || legacy::verify_password(&password, &phc))
                    .await
                    .map_err(|e| DropsealError::Io(std::io::Error::other(e)))??
            }
        };

        if !ok {
            warn!(bundle = %record.bundle_id, client, remaining, "unlock failed");
            return Err(DropsealError::Authentication);
        }

        self.attempts.reset(&key);
        info!(bundle = %record.bundle_id, "unlock succeeded");
        self.signer.issue(&record.bundle_id, now_unix)
    }

    /// Check an access token previously issued by [`Self::unlock`].
    pub fn validate_token(&self, token: &str, bundle_id: &str) -> DropsealResult<()> {
        self.signer.validate(token, bundle_id, unix_now())
    }
}

/// Periodically drop attempt state that no longer affects decisions.
pub fn spawn_evictor(store: Arc<dyn AttemptStore>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let removed = store.evict_expired(Instant::now());
            if removed > 0 {
                debug!(removed, "evicted expired unlock attempt state");
            }
        }
    })
}

/// Load the server secret from `unlock.server_secret_file`, or else from the
/// environment variable named by `unlock.server_secret_env`.
pub fn load_server_secret(config: &UnlockConfig) -> DropsealResult<ServerSecret> {
    let encoded = match &config.server_secret_file {
        Some(path) => read_secret_file(&expand_tilde(path))?,
        None => Zeroizing::new(std::env::var(&config.server_secret_env).map_err(|_| {
            DropsealError::Config(format!(
                "server secret not configured: set {} or unlock.server_secret_file",
                config.server_secret_env
            ))
        })?),
    };
    ServerSecret::from_b64(&encoded).map_err(|e| DropsealError::Config(format!("server secret: {e}")))
}

fn read_secret_file(path: &Path) -> DropsealResult<Zeroizing<String>> {
    std::fs::read_to_string(path)
        .map(Zeroizing::new)
        .map_err(|e| DropsealError::Config(format!("reading server secret {}: {e}", path.display())))
}

/// Fresh 256-bit server secret, base64url-encoded.
pub fn generate_server_secret(provider: &dyn CryptoProvider) -> DropsealResult<String> {
    let bytes = Zeroizing::new(random_array::<32>(provider)?);
    Ok(encoding::encode(&bytes[..]))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
