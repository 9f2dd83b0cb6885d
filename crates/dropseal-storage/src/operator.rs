//! OpenDAL Operator factory for dropseal storage backends

use anyhow::{Context, Result};
use opendal::Operator;

use dropseal_core::config::{expand_tilde, StorageBackend, StorageConfig};

/// S3 credentials, loaded by the caller (env or secret store)
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl S3Credentials {
    /// Read `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok()?,
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok()?,
        })
    }
}

/// Build an operator for the configured backend.
///
/// For S3, if `enforce_tls` is true and the endpoint uses HTTP, this returns
/// an error. Otherwise a warning is logged for non-HTTPS endpoints.
pub fn build_operator(cfg: &StorageConfig, creds: Option<&S3Credentials>) -> Result<Operator> {
    match cfg.backend {
        StorageBackend::Memory => Ok(Operator::new(opendal::services::Memory::default())
            .context("creating OpenDAL memory operator")?
            .finish()),
        StorageBackend::Fs => {
            let root = expand_tilde(&cfg.root);
            let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
            Ok(Operator::new(builder)
                .with_context(|| format!("creating OpenDAL fs operator at {}", root.display()))?
                .layer(opendal::layers::LoggingLayer::default())
                .finish())
        }
        StorageBackend::S3 => build_s3(cfg, creds),
    }
}

fn build_s3(cfg: &StorageConfig, creds: Option<&S3Credentials>) -> Result<Operator> {
    if cfg.endpoint.starts_with("http://") {
        if cfg.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                cfg.endpoint
            );
        }
        tracing::warn!(
            endpoint = %cfg.endpoint,
            "S3 endpoint uses plaintext HTTP; set storage.enforce_tls = true and use HTTPS in production"
        );
    }

    // path-style addressing is the default, which MinIO and SeaweedFS need
    let mut builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket);
    if let Some(creds) = creds {
        builder = builder
            .access_key_id(&creds.access_key_id)
            .secret_access_key(&creds.secret_access_key);
    }

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}
