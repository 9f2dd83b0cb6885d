use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DropsealError, DropsealResult};

/// Lower bound on PBKDF2 iterations accepted from any party.
pub const MIN_ITERATIONS: u32 = 10_000;
/// Upper bound; larger values are a denial-of-service vector.
pub const MAX_ITERATIONS: u32 = 1_000_000;
/// Roughly 200-300ms of PBKDF2-HMAC-SHA-256 on commodity hardware.
pub const DEFAULT_ITERATIONS: u32 = 600_000;
/// 1 MiB
pub const DEFAULT_CHUNK_SIZE: u32 = 1_048_576;

/// Top-level configuration (loaded from dropseal.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DropsealConfig {
    pub crypto: CryptoConfig,
    pub unlock: UnlockConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

/// Envelope encryption parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2 iterations for new bundles (default: 600000)
    pub iterations: u32,
    /// Chunk size used when sealing (default: 1048576)
    pub chunk_size: u32,
    /// Chunk sizes accepted in stored records. Server-validated allow-list.
    pub allowed_chunk_sizes: Vec<u32>,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            allowed_chunk_sizes: vec![DEFAULT_CHUNK_SIZE],
        }
    }
}

impl CryptoConfig {
    pub fn check_iterations(&self, iterations: u32) -> DropsealResult<()> {
        check_iterations(iterations)
    }

    pub fn check_chunk_size(&self, chunk_size: u32) -> DropsealResult<()> {
        if self.allowed_chunk_sizes.contains(&chunk_size) {
            Ok(())
        } else {
            Err(DropsealError::Config(format!(
                "chunk size {chunk_size} is not allowed (allowed: {:?})",
                self.allowed_chunk_sizes
            )))
        }
    }
}

/// Check an iteration count against [`MIN_ITERATIONS`]..=[`MAX_ITERATIONS`].
pub fn check_iterations(iterations: u32) -> DropsealResult<()> {
    if (MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iterations) {
        Ok(())
    } else {
        Err(DropsealError::Config(format!(
            "iteration count {iterations} outside [{MIN_ITERATIONS}, {MAX_ITERATIONS}]"
        )))
    }
}

/// Server-side unlock gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnlockConfig {
    /// Attempts allowed per (bundle, client) inside one window (default: 5)
    pub max_attempts: u32,
    /// Sliding window length in seconds (default: 600)
    pub window_secs: u64,
    /// Block duration once the limit is exceeded (default: 600)
    pub cooldown_secs: u64,
    /// Lifetime of issued access tokens (default: 300)
    pub token_ttl_secs: u64,
    /// Environment variable holding the base64url server secret
    pub server_secret_env: String,
    /// File holding the base64url server secret (takes precedence over env)
    pub server_secret_file: Option<PathBuf>,
}

impl Default for UnlockConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_secs: 600,
            cooldown_secs: 600,
            token_ttl_secs: 300,
            server_secret_env: "DROPSEAL_SERVER_SECRET".into(),
            server_secret_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Local directory (default)
    Fs,
    /// S3-compatible endpoint
    S3,
    /// In-process, lost on exit
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Refuse plaintext HTTP endpoints
    pub enforce_tls: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: PathBuf::from("~/.local/share/dropseal"),
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "dropseal".into(),
            enforce_tls: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl DropsealConfig {
    pub fn from_toml_str(s: &str) -> DropsealResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| DropsealError::Config(format!("parsing config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> DropsealResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject configurations the system must never start with.
    pub fn validate(&self) -> DropsealResult<()> {
        check_iterations(self.crypto.iterations)?;
        if self.crypto.allowed_chunk_sizes.is_empty() {
            return Err(DropsealError::Config(
                "crypto.allowed_chunk_sizes must not be empty".into(),
            ));
        }
        if self.crypto.allowed_chunk_sizes.contains(&0) {
            return Err(DropsealError::Config("chunk size must be non-zero".into()));
        }
        self.crypto.check_chunk_size(self.crypto.chunk_size)?;
        if self.unlock.max_attempts == 0 {
            return Err(DropsealError::Config("unlock.max_attempts must be at least 1".into()));
        }
        if self.unlock.window_secs == 0 || self.unlock.token_ttl_secs == 0 {
            return Err(DropsealError::Config(
                "unlock.window_secs and unlock.token_ttl_secs must be non-zero".into(),
            ));
        }
        if self.storage.backend == StorageBackend::S3
            && self.storage.enforce_tls
            && self.storage.endpoint.starts_with("http://")
        {
            return Err(DropsealError::Config(format!(
                "S3 endpoint uses plaintext HTTP ({}), but storage.enforce_tls is enabled",
                self.storage.endpoint
            )));
        }
        Ok(())
    }
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}
