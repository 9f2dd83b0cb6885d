//! Chunked AES-256-GCM file encryption
//!
//! Ciphertext blob format (binary):
//! ```text
//! [chunk 0: ciphertext || 16-byte tag][chunk 1: ...]...[chunk n-1: ...]
//! nonce_i = base_nonce with its last 4 bytes XOR BE32(i)
//! AAD_i   = BE32(i)
//! ```
//!
//! There are no length delimiters: every chunk except the last carries
//! exactly `chunk_size` plaintext bytes, and the last carries the remainder
//! (a full `chunk_size` when the file size is an exact multiple). Decryption
//! recomputes the boundaries from `chunk_size` and `original_size`.
//!
//! The AAD binds each chunk to its position, so chunks cannot be reordered or
//! spliced within a file. The base nonce is random per file and the DEK is
//! single-use, so per-chunk nonces never repeat under one key.

use std::io::{ErrorKind, Read, Write};

use zeroize::{Zeroize, Zeroizing};

use crate::encoding;
use crate::error::{CryptoError, CryptoResult};
use crate::keys::Dek;
use crate::provider::{random_array, CryptoProvider};
use crate::{NONCE_SIZE, TAG_SIZE};

pub use dropseal_core::config::DEFAULT_CHUNK_SIZE;

/// Progress callback: `(chunks_done, chunk_count)`, invoked after every chunk.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Random 96-bit per-file nonce from which every chunk nonce is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseNonce([u8; NONCE_SIZE]);

impl BaseNonce {
    pub fn generate(provider: &dyn CryptoProvider) -> CryptoResult<Self> {
        random_array::<NONCE_SIZE>(provider).map(Self)
    }

    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    pub fn to_b64(&self) -> String {
        encoding::encode(&self.0)
    }

    pub fn from_b64(s: &str) -> CryptoResult<Self> {
        encoding::decode_array::<NONCE_SIZE>(s, "baseNonceB64").map(Self)
    }
}

/// A whole-file ciphertext plus everything needed to decrypt it.
#[derive(Debug, Clone)]
pub struct EncryptedBlob {
    pub ciphertext: Vec<u8>,
    pub base_nonce: BaseNonce,
    pub chunk_size: u32,
    pub chunk_count: u32,
    pub original_size: u64,
}

/// Result of a streaming encryption.
#[derive(Debug, Clone, Copy)]
pub struct StreamSummary {
    pub base_nonce: BaseNonce,
    pub chunk_size: u32,
    pub chunk_count: u32,
    pub original_size: u64,
}

/// Nonce for chunk `index`: base nonce with BE32(index) XORed into its last 4 bytes.
pub fn chunk_nonce(base: &BaseNonce, index: u32) -> [u8; NONCE_SIZE] {
    let mut nonce = base.0;
    for (n, i) in nonce[NONCE_SIZE - 4..].iter_mut().zip(index.to_be_bytes()) {
        *n ^= i;
    }
    nonce
}

/// `ceil(original_size / chunk_size)`; must fit in 32 bits.
pub fn chunk_count(original_size: u64, chunk_size: u32) -> CryptoResult<u32> {
    if chunk_size == 0 {
        return Err(CryptoError::Config("chunk size must be non-zero".into()));
    }
    let count = original_size.div_ceil(u64::from(chunk_size));
    u32::try_from(count).map_err(|_| {
        CryptoError::Config(format!(
            "file of {original_size} bytes needs {count} chunks, more than the nonce schedule allows"
        ))
    })
}

/// Plaintext length of the last chunk. An exact multiple yields a full chunk, never zero.
pub fn last_chunk_len(original_size: u64, chunk_size: u32) -> u64 {
    match original_size % u64::from(chunk_size) {
        0 if original_size > 0 => u64::from(chunk_size),
        rem => rem,
    }
}

/// Total ciphertext length: plaintext plus one tag per chunk.
pub fn ciphertext_len(original_size: u64, chunk_size: u32) -> CryptoResult<u64> {
    let count = chunk_count(original_size, chunk_size)?;
    u64::from(count)
        .checked_mul(TAG_SIZE as u64)
        .and_then(|tags| original_size.checked_add(tags))
        .ok_or_else(|| {
            CryptoError::Config(format!("ciphertext for {original_size} bytes overflows u64"))
        })
}

/// Encrypt one chunk. Output is `ciphertext || tag`.
pub fn encrypt_chunk(
    provider: &dyn CryptoProvider,
    dek: &Dek,
    base_nonce: &BaseNonce,
    index: u32,
    plaintext: &[u8],
) -> CryptoResult<Vec<u8>> {
    let nonce = chunk_nonce(base_nonce, index);
    provider.aead_encrypt(dek.as_bytes(), &nonce, &index.to_be_bytes(), plaintext)
}

/// Decrypt one chunk; fails with [`CryptoError::ChunkAuthentication`] naming `index`.
pub fn decrypt_chunk(
    provider: &dyn CryptoProvider,
    dek: &Dek,
    base_nonce: &BaseNonce,
    index: u32,
    ciphertext: &[u8],
) -> CryptoResult<Vec<u8>> {
    let nonce = chunk_nonce(base_nonce, index);
    provider
        .aead_decrypt(dek.as_bytes(), &nonce, &index.to_be_bytes(), ciphertext)
        .map_err(|_| CryptoError::ChunkAuthentication { index })
}

/// Encrypt a whole in-memory file under a fresh base nonce.
pub fn encrypt_chunked(
    provider: &dyn CryptoProvider,
    dek: &Dek,
    plaintext: &[u8],
    chunk_size: u32,
    progress: Option<&ProgressFn>,
) -> CryptoResult<EncryptedBlob> {
    let original_size = plaintext.len() as u64;
    let count = chunk_count(original_size, chunk_size)?;
    let base_nonce = BaseNonce::generate(provider)?;

    let mut ciphertext = Vec::with_capacity(plaintext.len() + count as usize * TAG_SIZE);
    for (index, chunk) in (0u32..).zip(plaintext.chunks(chunk_size as usize)) {
        ciphertext.extend_from_slice(&encrypt_chunk(provider, dek, &base_nonce, index, chunk)?);
        if let Some(cb) = progress {
            cb(u64::from(index) + 1, u64::from(count));
        }
    }

    tracing::debug!(original_size, chunk_size, chunks = count, "encrypted file");

    Ok(EncryptedBlob {
        ciphertext,
        base_nonce,
        chunk_size,
        chunk_count: count,
        original_size,
    })
}

/// Decrypt a whole in-memory ciphertext.
///
/// The ciphertext length must match `original_size` exactly. The first chunk
/// that fails authentication aborts the call and all plaintext decrypted so
/// far is wiped.
pub fn decrypt_chunked(
    provider: &dyn CryptoProvider,
    dek: &Dek,
    ciphertext: &[u8],
    base_nonce: &BaseNonce,
    chunk_size: u32,
    original_size: u64,
    progress: Option<&ProgressFn>,
) -> CryptoResult<Vec<u8>> {
    let count = chunk_count(original_size, chunk_size)?;
    let expected = ciphertext_len(original_size, chunk_size)?;
    if ciphertext.len() as u64 != expected {
        return Err(CryptoError::Truncated {
            expected,
            actual: ciphertext.len() as u64,
        });
    }

    let capacity = usize::try_from(original_size)
        .map_err(|_| CryptoError::Config("file too large for this platform".into()))?;
    let mut plaintext = Vec::with_capacity(capacity);
    let stride = chunk_size as usize + TAG_SIZE;

    for (index, chunk) in (0u32..).zip(ciphertext.chunks(stride)) {
        match decrypt_chunk(provider, dek, base_nonce, index, chunk) {
            Ok(mut part) => {
                plaintext.extend_from_slice(&part);
                part.zeroize();
            }
            Err(e) => {
                tracing::debug!(index, chunks = count, "chunk failed authentication");
                plaintext.zeroize();
                return Err(e);
            }
        }
        if let Some(cb) = progress {
            cb(u64::from(index) + 1, u64::from(count));
        }
    }

    Ok(plaintext)
}

/// Encrypt `original_size` bytes from `reader` into `writer`, holding one
/// chunk in memory at a time.
///
/// Fails if the reader yields fewer or more bytes than `original_size`.
pub fn encrypt_stream<R: Read, W: Write>(
    provider: &dyn CryptoProvider,
    dek: &Dek,
    reader: &mut R,
    writer: &mut W,
    original_size: u64,
    chunk_size: u32,
    progress: Option<&ProgressFn>,
) -> CryptoResult<StreamSummary> {
    let count = chunk_count(original_size, chunk_size)?;
    let base_nonce = BaseNonce::generate(provider)?;
    let mut buf = Zeroizing::new(vec![0u8; chunk_size as usize]);

    for index in 0..count {
        let want = if index + 1 == count {
            last_chunk_len(original_size, chunk_size) as usize
        } else {
            chunk_size as usize
        };
        reader.read_exact(&mut buf[..want]).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                std::io::Error::new(ErrorKind::UnexpectedEof, "input shorter than declared size")
            } else {
                e
            }
        })?;
        writer.write_all(&encrypt_chunk(provider, dek, &base_nonce, index, &buf[..want])?)?;
        if let Some(cb) = progress {
            cb(u64::from(index) + 1, u64::from(count));
        }
    }
    drop(buf);

    let mut extra = [0u8; 1];
    if reader.read(&mut extra)? != 0 {
        return Err(CryptoError::Io(std::io::Error::new(
            ErrorKind::InvalidData,
            "input longer than declared size",
        )));
    }
    writer.flush()?;

    Ok(StreamSummary {
        base_nonce,
        chunk_size,
        chunk_count: count,
        original_size,
    })
}

/// Decrypt a chunked ciphertext from `reader` into `writer`, one chunk at a time.
///
/// Chunks that authenticated before a failure have already been written;
/// callers must discard the writer's contents on error.
#[allow(clippy::too_many_arguments)]
pub fn decrypt_stream<R: Read, W: Write>(
    provider: &dyn CryptoProvider,
    dek: &Dek,
    reader: &mut R,
    writer: &mut W,
    base_nonce: &BaseNonce,
    chunk_size: u32,
    original_size: u64,
    progress: Option<&ProgressFn>,
) -> CryptoResult<u64> {
    let count = chunk_count(original_size, chunk_size)?;
    let expected = ciphertext_len(original_size, chunk_size)?;
    let mut buf = vec![0u8; chunk_size as usize + TAG_SIZE];
    let mut consumed = 0u64;

    for index in 0..count {
        let want = if index + 1 == count {
            last_chunk_len(original_size, chunk_size) as usize + TAG_SIZE
        } else {
            chunk_size as usize + TAG_SIZE
        };
        let got = read_full(reader, &mut buf[..want])?;
        consumed += got as u64;
        if got < want {
            return Err(CryptoError::Truncated {
                expected,
                actual: consumed,
            });
        }

        let part = Zeroizing::new(decrypt_chunk(provider, dek, base_nonce, index, &buf[..want])?);
        writer.write_all(&part)?;
        if let Some(cb) = progress {
            cb(u64::from(index) + 1, u64::from(count));
        }
    }

    let mut extra = [0u8; 1];
    if reader.read(&mut extra)? != 0 {
        return Err(CryptoError::Truncated {
            expected,
            actual: consumed + 1,
        });
    }
    writer.flush()?;

    Ok(original_size)
}

/// Read until `buf` is full or EOF; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SystemProvider;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    const SMALL: u32 = 64;

    fn dek() -> Dek {
        Dek::generate(&SystemProvider).unwrap()
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 5)) as u8).collect()
    }

    #[test]
    fn test_chunk_nonce_xors_big_endian_index() {
        let base = BaseNonce::from_bytes([0u8; NONCE_SIZE]);
        assert_eq!(chunk_nonce(&base, 0), [0u8; NONCE_SIZE]);
        let n = chunk_nonce(&base, 0x0102_0304);
        assert_eq!(&n[..8], &[0u8; 8]);
        assert_eq!(&n[8..], &[1, 2, 3, 4]);

        let base = BaseNonce::from_bytes([0xFF; NONCE_SIZE]);
        let n = chunk_nonce(&base, 1);
        assert_eq!(n[11], 0xFE);
        assert_eq!(n[10], 0xFF);
    }

    #[test]
    fn test_chunk_nonces_distinct() {
        let base = BaseNonce::generate(&SystemProvider).unwrap();
        let nonces: std::collections::HashSet<_> =
            (0..1000).map(|i| chunk_nonce(&base, i)).collect();
        assert_eq!(nonces.len(), 1000);
    }

    #[test]
    fn test_chunk_count_and_last_chunk() {
        assert_eq!(chunk_count(0, SMALL).unwrap(), 0);
        assert_eq!(chunk_count(1, SMALL).unwrap(), 1);
        assert_eq!(chunk_count(64, SMALL).unwrap(), 1);
        assert_eq!(chunk_count(65, SMALL).unwrap(), 2);
        assert_eq!(chunk_count(3 * 1_048_576, 1_048_576).unwrap(), 3);

        assert_eq!(last_chunk_len(64, SMALL), 64, "exact multiple gives a full chunk");
        assert_eq!(last_chunk_len(128, SMALL), 64);
        assert_eq!(last_chunk_len(65, SMALL), 1);
        assert_eq!(last_chunk_len(0, SMALL), 0);
    }

    #[test]
    fn test_chunk_count_limits() {
        assert!(matches!(chunk_count(10, 0), Err(CryptoError::Config(_))));
        assert!(chunk_count(u64::from(u32::MAX), 1).is_ok());
        assert!(chunk_count(u64::from(u32::MAX) + 1, 1).is_err());
    }

    #[test]
    fn test_ciphertext_len_overflow() {
        let max = u64::from(u32::MAX);
        assert_eq!(chunk_count(max * max, u32::MAX).unwrap(), u32::MAX);
        assert!(matches!(
            ciphertext_len(max * max, u32::MAX),
            Err(CryptoError::Config(_))
        ));
        assert!(matches!(
            decrypt_chunked(
                &SystemProvider,
                &dek(),
                &[],
                &BaseNonce::from_bytes([0; NONCE_SIZE]),
                u32::MAX,
                max * max,
                None,
            ),
            Err(CryptoError::Config(_))
        ));
    }

    #[test]
    fn test_roundtrip_boundary_sizes() {
        let key = dek();
        let cs = SMALL as usize;
        for len in [0, 1, cs - 1, cs, cs + 1, 2 * cs, 3 * cs, 5 * cs + 7] {
            let pt = data(len);
            let blob = encrypt_chunked(&SystemProvider, &key, &pt, SMALL, None).unwrap();
            assert_eq!(blob.ciphertext.len() as u64, ciphertext_len(len as u64, SMALL).unwrap());
            let out = decrypt_chunked(
                &SystemProvider,
                &key,
                &blob.ciphertext,
                &blob.base_nonce,
                SMALL,
                len as u64,
                None,
            )
            .unwrap();
            assert_eq!(out, pt, "roundtrip failed at length {len}");
        }
    }

    #[test]
    fn test_wrong_dek_fails_on_first_chunk() {
        let pt = data(200);
        let blob = encrypt_chunked(&SystemProvider, &dek(), &pt, SMALL, None).unwrap();
        let result = decrypt_chunked(
            &SystemProvider,
            &dek(),
            &blob.ciphertext,
            &blob.base_nonce,
            SMALL,
            200,
            None,
        );
        assert!(matches!(result, Err(CryptoError::ChunkAuthentication { index: 0 })));
    }

    #[test]
    fn test_bit_flip_reports_failing_chunk() {
        let key = dek();
        let pt = data(4 * SMALL as usize);
        let blob = encrypt_chunked(&SystemProvider, &key, &pt, SMALL, None).unwrap();
        let stride = SMALL as usize + TAG_SIZE;

        // one flip inside ciphertext body and one inside the tag of every chunk
        for index in 0..4usize {
            for offset in [3, stride - 1] {
                let mut ct = blob.ciphertext.clone();
                ct[index * stride + offset] ^= 0x01;
                let result = decrypt_chunked(
                    &SystemProvider,
                    &key,
                    &ct,
                    &blob.base_nonce,
                    SMALL,
                    pt.len() as u64,
                    None,
                );
                assert!(
                    matches!(result, Err(CryptoError::ChunkAuthentication { index: i }) if i as usize == index),
                    "flip in chunk {index} at offset {offset}"
                );
            }
        }
    }

    #[test]
    fn test_chunks_authenticate_independently() {
        let key = dek();
        let pt = data(3 * SMALL as usize);
        let blob = encrypt_chunked(&SystemProvider, &key, &pt, SMALL, None).unwrap();
        let stride = SMALL as usize + TAG_SIZE;

        let mut ct = blob.ciphertext.clone();
        ct[2 * stride + 5] ^= 0x80;

        for index in 0..2u32 {
            let start = index as usize * stride;
            let part = decrypt_chunk(
                &SystemProvider,
                &key,
                &blob.base_nonce,
                index,
                &ct[start..start + stride],
            )
            .unwrap();
            assert_eq!(part, &pt[start - index as usize * TAG_SIZE..][..SMALL as usize]);
        }
        assert!(decrypt_chunk(&SystemProvider, &key, &blob.base_nonce, 2, &ct[2 * stride..]).is_err());
    }

    #[test]
    fn test_reordered_chunks_rejected() {
        let key = dek();
        let pt = data(2 * SMALL as usize);
        let blob = encrypt_chunked(&SystemProvider, &key, &pt, SMALL, None).unwrap();
        let stride = SMALL as usize + TAG_SIZE;

        let mut swapped = blob.ciphertext[stride..].to_vec();
        swapped.extend_from_slice(&blob.ciphertext[..stride]);
        let result = decrypt_chunked(
            &SystemProvider,
            &key,
            &swapped,
            &blob.base_nonce,
            SMALL,
            pt.len() as u64,
            None,
        );
        assert!(matches!(result, Err(CryptoError::ChunkAuthentication { index: 0 })));
    }

    #[test]
    fn test_truncated_or_extended_ciphertext_rejected() {
        let key = dek();
        let pt = data(150);
        let blob = encrypt_chunked(&SystemProvider, &key, &pt, SMALL, None).unwrap();

        let short = &blob.ciphertext[..blob.ciphertext.len() - 1];
        assert!(matches!(
            decrypt_chunked(&SystemProvider, &key, short, &blob.base_nonce, SMALL, 150, None),
            Err(CryptoError::Truncated { .. })
        ));

        // a whole dropped trailing chunk is caught by the size check too
        let dropped = &blob.ciphertext[..2 * (SMALL as usize + TAG_SIZE)];
        assert!(matches!(
            decrypt_chunked(&SystemProvider, &key, dropped, &blob.base_nonce, SMALL, 150, None),
            Err(CryptoError::Truncated { .. })
        ));

        let mut long = blob.ciphertext.clone();
        long.push(0);
        assert!(decrypt_chunked(&SystemProvider, &key, &long, &blob.base_nonce, SMALL, 150, None).is_err());
    }

    #[test]
    fn test_progress_reports_every_chunk() {
        let seen = Arc::new(AtomicU64::new(0));
        let seen_cb = seen.clone();
        let progress: ProgressFn = Box::new(move |done, total| {
            assert_eq!(total, 4);
            seen_cb.store(done, Ordering::SeqCst);
        });
        let pt = data(4 * SMALL as usize - 3);
        encrypt_chunked(&SystemProvider, &dek(), &pt, SMALL, Some(&progress)).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_fresh_base_nonce_per_file() {
        let key = dek();
        let a = encrypt_chunked(&SystemProvider, &key, b"same", SMALL, None).unwrap();
        let b = encrypt_chunked(&SystemProvider, &key, b"same", SMALL, None).unwrap();
        assert_ne!(a.base_nonce, b.base_nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_stream_matches_buffer_format() {
        let key = dek();
        let pt = data(5 * SMALL as usize + 9);
        let mut ct = Vec::new();
        let summary = encrypt_stream(
            &SystemProvider,
            &key,
            &mut pt.as_slice(),
            &mut ct,
            pt.len() as u64,
            SMALL,
            None,
        )
        .unwrap();
        assert_eq!(summary.chunk_count, 6);

        // the buffer decryptor reads what the stream encryptor wrote
        let out = decrypt_chunked(
            &SystemProvider,
            &key,
            &ct,
            &summary.base_nonce,
            SMALL,
            pt.len() as u64,
            None,
        )
        .unwrap();
        assert_eq!(out, pt);

        let mut streamed = Vec::new();
        decrypt_stream(
            &SystemProvider,
            &key,
            &mut ct.as_slice(),
            &mut streamed,
            &summary.base_nonce,
            SMALL,
            pt.len() as u64,
            None,
        )
        .unwrap();
        assert_eq!(streamed, pt);
    }

    #[test]
    fn test_stream_size_mismatch() {
        let key = dek();
        let pt = data(100);
        let mut sink = Vec::new();
        assert!(encrypt_stream(&SystemProvider, &key, &mut pt.as_slice(), &mut sink, 101, SMALL, None).is_err());
        let mut sink = Vec::new();
        assert!(encrypt_stream(&SystemProvider, &key, &mut pt.as_slice(), &mut sink, 99, SMALL, None).is_err());
    }

    #[test]
    fn test_stream_decrypt_truncated() {
        let key = dek();
        let pt = data(100);
        let blob = encrypt_chunked(&SystemProvider, &key, &pt, SMALL, None).unwrap();
        let short = &blob.ciphertext[..blob.ciphertext.len() - 4];
        let mut sink = Vec::new();
        let result = decrypt_stream(
            &SystemProvider,
            &key,
            &mut &short[..],
            &mut sink,
            &blob.base_nonce,
            SMALL,
            100,
            None,
        );
        assert!(matches!(result, Err(CryptoError::Truncated { .. })));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn roundtrip_any_length(len in 0usize..=600, cs in 1u32..=128) {
            let key = dek();
            let pt = data(len);
            let blob = encrypt_chunked(&SystemProvider, &key, &pt, cs, None).unwrap();
            prop_assert_eq!(blob.chunk_count, chunk_count(len as u64, cs).unwrap());
            let out = decrypt_chunked(&SystemProvider, &key, &blob.ciphertext, &blob.base_nonce, cs, len as u64, None).unwrap();
            prop_assert_eq!(out, pt);
        }
    }
}
