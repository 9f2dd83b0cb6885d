//! Sender and recipient flows over a whole bundle.
//!
//! A session runs the passphrase derivations once and keeps the resulting
//! keys for its own lifetime only; every file then gets its own DEK and base
//! nonce. Files are independent, so both directions fan out over rayon.

use std::io::{Read, Write};

use rayon::prelude::*;
use secrecy::SecretString;

use dropseal_core::config::CryptoConfig;
use dropseal_core::types::{EncryptionParams, FileRecord};

use crate::chunk::{self, BaseNonce, ProgressFn};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{self, BundleSalts, ContentKeys, Salt, UnlockProof};
use crate::keys::{self, Dek, WrappedDek};
use crate::metadata::{self, EncryptedMetadata, FileMetadata};
use crate::provider::CryptoProvider;

/// A file to seal.
#[derive(Debug, Clone)]
pub struct PlainFile {
    pub filename: String,
    pub mimetype: String,
    pub data: Vec<u8>,
}

/// Sealed output: the record to persist and the blob to upload under
/// `record.content_key`.
#[derive(Debug, Clone)]
pub struct SealedFile {
    pub record: FileRecord,
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct OpenedFile {
    pub metadata: FileMetadata,
    pub plaintext: Vec<u8>,
}

fn config_error(e: dropseal_core::DropsealError) -> CryptoError {
    CryptoError::Config(e.to_string())
}

/// Sender side of one bundle.
pub struct SealingSession<'p> {
    provider: &'p dyn CryptoProvider,
    salts: BundleSalts,
    iterations: u32,
    chunk_size: u32,
    keys: ContentKeys,
    proof: UnlockProof,
}

impl<'p> SealingSession<'p> {
    /// Start a bundle with fresh salts and the configured parameters.
    pub fn new(
        provider: &'p dyn CryptoProvider,
        passphrase: &SecretString,
        config: &CryptoConfig,
    ) -> CryptoResult<Self> {
        config
            .check_iterations(config.iterations)
            .map_err(config_error)?;
        config
            .check_chunk_size(config.chunk_size)
            .map_err(config_error)?;
        let salts = BundleSalts::generate(provider)?;
        Self::with_salts(provider, passphrase, salts, config.iterations, config.chunk_size)
    }

    /// Start a bundle with caller-chosen salts.
    pub fn with_salts(
        provider: &'p dyn CryptoProvider,
        passphrase: &SecretString,
        salts: BundleSalts,
        iterations: u32,
        chunk_size: u32,
    ) -> CryptoResult<Self> {
        chunk::chunk_count(0, chunk_size)?;
        let keys = kdf::derive_content_keys(provider, passphrase, salts.encryption(), iterations)?;
        let proof = kdf::derive_unlock_proof(provider, passphrase, salts.unlock(), iterations)?;
        Ok(Self {
            provider,
            salts,
            iterations,
            chunk_size,
            keys,
            proof,
        })
    }

    /// The proof to enroll with the server.
    pub fn unlock_proof(&self) -> &UnlockProof {
        &self.proof
    }

    pub fn salts(&self) -> &BundleSalts {
        &self.salts
    }

    /// Bundle parameters to persist, given the verifier the server computed
    /// for [`Self::unlock_proof`].
    pub fn encryption_params(&self, unlock_verifier_b64: String) -> EncryptionParams {
        EncryptionParams {
            encryption_salt_b64: self.salts.encryption().to_b64(),
            unlock_salt_b64: self.salts.unlock().to_b64(),
            encryption_iterations: self.iterations,
            encryption_chunk_size: self.chunk_size,
            unlock_verifier_b64,
        }
    }

    /// Seal one in-memory file.
    pub fn seal_file(
        &self,
        file: &PlainFile,
        progress: Option<&ProgressFn>,
    ) -> CryptoResult<SealedFile> {
        let dek = Dek::generate(self.provider)?;
        let blob = chunk::encrypt_chunked(self.provider, &dek, &file.data, self.chunk_size, progress)?;
        let record = self.file_record(
            &dek,
            &file.filename,
            &file.mimetype,
            blob.original_size,
            &blob.base_nonce,
        )?;
        Ok(SealedFile {
            record,
            ciphertext: blob.ciphertext,
        })
    }

    /// Seal all files in parallel. Fails if any file fails.
    pub fn seal_files(&self, files: &[PlainFile]) -> CryptoResult<Vec<SealedFile>> {
        files.par_iter().map(|f| self.seal_file(f, None)).collect()
    }

    /// Seal `size` bytes from `reader` into `writer` one chunk at a time.
    pub fn seal_stream<R: Read, W: Write>(
        &self,
        filename: &str,
        mimetype: &str,
        reader: &mut R,
        writer: &mut W,
        size: u64,
        progress: Option<&ProgressFn>,
    ) -> CryptoResult<FileRecord> {
        let dek = Dek::generate(self.provider)?;
        let summary = chunk::encrypt_stream(
            self.provider,
            &dek,
            reader,
            writer,
            size,
            self.chunk_size,
            progress,
        )?;
        self.file_record(&dek, filename, mimetype, size, &summary.base_nonce)
    }

    fn file_record(
        &self,
        dek: &Dek,
        filename: &str,
        mimetype: &str,
        size: u64,
        base_nonce: &BaseNonce,
    ) -> CryptoResult<FileRecord> {
        let wrapped = keys::wrap_dek(self.provider, dek, &self.keys.kek)?;
        let meta = FileMetadata {
            filename: filename.to_string(),
            mimetype: mimetype.to_string(),
            size,
        };
        let encrypted_meta = metadata::encrypt_metadata(self.provider, &meta, &self.keys.metadata_key)?;

        let (wrapped_dek_b64, wrapped_dek_iv_b64) = wrapped.to_b64_pair();
        let (encrypted_metadata_b64, encrypted_metadata_iv_b64) = encrypted_meta.to_b64_pair();
        let content_key = uuid::Uuid::new_v4().to_string();

        tracing::debug!(content_key = %content_key, size, "sealed file");

        Ok(FileRecord {
            content_key,
            wrapped_dek_b64,
            wrapped_dek_iv_b64,
            encrypted_metadata_b64,
            encrypted_metadata_iv_b64,
            base_nonce_b64: base_nonce.to_b64(),
            original_size: size,
        })
    }
}

impl std::fmt::Debug for SealingSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealingSession")
            .field("salts", &self.salts)
            .field("iterations", &self.iterations)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

/// Recipient side of one bundle.
pub struct OpeningSession<'p> {
    provider: &'p dyn CryptoProvider,
    keys: ContentKeys,
    chunk_size: u32,
}

impl<'p> OpeningSession<'p> {
    /// Validate a stored record's parameters against the deployment
    /// configuration, then derive the content keys.
    pub fn new(
        provider: &'p dyn CryptoProvider,
        passphrase: &SecretString,
        params: &EncryptionParams,
        config: &CryptoConfig,
    ) -> CryptoResult<Self> {
        config
            .check_iterations(params.encryption_iterations)
            .map_err(config_error)?;
        config
            .check_chunk_size(params.encryption_chunk_size)
            .map_err(config_error)?;
        let salts = BundleSalts::from_b64(&params.encryption_salt_b64, &params.unlock_salt_b64)?;
        let keys = kdf::derive_content_keys(
            provider,
            passphrase,
            salts.encryption(),
            params.encryption_iterations,
        )?;
        Ok(Self {
            provider,
            keys,
            chunk_size: params.encryption_chunk_size,
        })
    }

    /// Decrypt only the metadata of a file.
    pub fn file_metadata(&self, record: &FileRecord) -> CryptoResult<FileMetadata> {
        let encrypted = EncryptedMetadata::from_b64_pair(
            &record.encrypted_metadata_b64,
            &record.encrypted_metadata_iv_b64,
        )?;
        metadata::decrypt_metadata(self.provider, &encrypted, &self.keys.metadata_key)
    }

    /// Unwrap the DEK, then decrypt metadata and content.
    pub fn open_file(
        &self,
        record: &FileRecord,
        ciphertext: &[u8],
        progress: Option<&ProgressFn>,
    ) -> CryptoResult<OpenedFile> {
        let dek = self.unwrap(record)?;
        let metadata = self.file_metadata(record)?;
        check_declared_size(&metadata, record)?;
        let base_nonce = BaseNonce::from_b64(&record.base_nonce_b64)?;
        let plaintext = chunk::decrypt_chunked(
            self.provider,
            &dek,
            ciphertext,
            &base_nonce,
            self.chunk_size,
            record.original_size,
            progress,
        )?;
        Ok(OpenedFile {
            metadata,
            plaintext,
        })
    }

    /// Open several files in parallel, one result per file in input order.
    pub fn open_files(&self, files: &[(&FileRecord, &[u8])]) -> Vec<CryptoResult<OpenedFile>> {
        files
            .par_iter()
            .map(|(record, ciphertext)| self.open_file(record, ciphertext, None))
            .collect()
    }

    /// Streaming form of [`Self::open_file`]. On error the writer may hold
    /// plaintext from chunks that authenticated earlier and must be discarded.
    pub fn open_stream<R: Read, W: Write>(
        &self,
        record: &FileRecord,
        reader: &mut R,
        writer: &mut W,
        progress: Option<&ProgressFn>,
    ) -> CryptoResult<FileMetadata> {
        let dek = self.unwrap(record)?;
        let metadata = self.file_metadata(record)?;
        check_declared_size(&metadata, record)?;
        let base_nonce = BaseNonce::from_b64(&record.base_nonce_b64)?;
        chunk::decrypt_stream(
            self.provider,
            &dek,
            reader,
            writer,
            &base_nonce,
            self.chunk_size,
            record.original_size,
            progress,
        )?;
        Ok(metadata)
    }

    fn unwrap(&self, record: &FileRecord) -> CryptoResult<Dek> {
        let wrapped = WrappedDek::from_b64_pair(&record.wrapped_dek_b64, &record.wrapped_dek_iv_b64)?;
        keys::unwrap_dek(self.provider, &wrapped, &self.keys.kek)
    }
}

/// `originalSize` is unauthenticated; the size sealed inside the metadata is
/// not. A mismatch means whole trailing chunks may have been cut.
fn check_declared_size(metadata: &FileMetadata, record: &FileRecord) -> CryptoResult<()> {
    if metadata.size != record.original_size {
        return Err(CryptoError::Truncated {
            expected: metadata.size,
            actual: record.original_size,
        });
    }
    Ok(())
}

impl std::fmt::Debug for OpeningSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpeningSession")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

/// Recipient-side unlock proof for a stored bundle.
pub fn unlock_proof_for(
    provider: &dyn CryptoProvider,
    passphrase: &SecretString,
    params: &EncryptionParams,
) -> CryptoResult<UnlockProof> {
    let salt = Salt::from_b64(&params.unlock_salt_b64, "unlockSaltB64")?;
    kdf::derive_unlock_proof(provider, passphrase, &salt, params.encryption_iterations)
}
