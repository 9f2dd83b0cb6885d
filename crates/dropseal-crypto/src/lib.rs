//! dropseal-crypto: client-side envelope encryption for dropseal bundles
//!
//! Architecture: passphrase-derived KEK wraps a random per-file DEK; the DEK
//! encrypts the file in fixed-size AES-256-GCM chunks.
//!
//! Key hierarchy:
//! ```text
//! passphrase
//!   ├── PBKDF2-SHA256("dropseal/content/v1" || pw, encryption salt) → 96 bytes
//!   │   ├── [0..32)  KEK            (wraps DEKs, AES-256-GCM, random IV)
//!   │   ├── [32..64) metadata key   (encrypts {filename, mimetype, size})
//!   │   └── [64..96) reserved       (derived, discarded)
//!   └── PBKDF2-SHA256("dropseal/unlock/v1" || pw, unlock salt) → 32 bytes
//!       └── unlock proof            (sent to server, stored as HMAC(secret, proof))
//!
//! DEK (per file, random 256-bit)
//!   └── Chunk AEAD: AES-256-GCM (nonce = base nonce XOR BE32(index), AAD = BE32(index))
//! ```

pub mod bundle;
pub mod chunk;
pub mod encoding;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod metadata;
pub mod provider;
pub mod verifier;

pub use bundle::{unlock_proof_for, OpenedFile, OpeningSession, PlainFile, SealedFile, SealingSession};
pub use chunk::{decrypt_chunked, encrypt_chunked, BaseNonce, EncryptedBlob, ProgressFn};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_content_keys, derive_unlock_proof, BundleSalts, ContentKeys, Salt, UnlockProof};
pub use keys::{unwrap_dek, wrap_dek, Dek, Kek, WrappedDek};
pub use metadata::{decrypt_metadata, encrypt_metadata, EncryptedMetadata, FileMetadata, MetadataKey};
pub use provider::{CryptoProvider, SystemProvider};
pub use verifier::{compute_verifier, verify, ServerSecret, Verifier};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce / IV (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;
