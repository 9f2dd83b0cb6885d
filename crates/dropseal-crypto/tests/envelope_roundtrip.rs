//! End-to-end envelope tests through the public API: derivation, wrapping,
//! chunked encryption and the unlock verifier together.

use dropseal_core::config::CryptoConfig;
use dropseal_core::DropsealError;
use dropseal_crypto::chunk::{chunk_count, ciphertext_len};
use dropseal_crypto::{
    compute_verifier, decrypt_chunked, derive_content_keys, derive_unlock_proof, encrypt_chunked,
    unlock_proof_for, unwrap_dek, verify, wrap_dek, CryptoError, Dek, OpeningSession,
    PlainFile, Salt, SealingSession, ServerSecret, SystemProvider, TAG_SIZE,
};
use secrecy::SecretString;

const MIB: usize = 1_048_576;

fn passphrase(s: &str) -> SecretString {
    SecretString::from(s.to_string())
}

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[test]
fn three_mib_file_in_one_mib_chunks() {
    let dek = Dek::generate(&SystemProvider).unwrap();
    let data = make_data(3 * MIB);

    let blob = encrypt_chunked(&SystemProvider, &dek, &data, MIB as u32, None).unwrap();
    assert_eq!(blob.chunk_count, 3);
    assert_eq!(chunk_count(3_145_728, MIB as u32).unwrap(), 3);
    assert_eq!(blob.ciphertext.len(), 3 * (MIB + TAG_SIZE));
    assert_eq!(
        ciphertext_len(3_145_728, MIB as u32).unwrap(),
        blob.ciphertext.len() as u64
    );

    let plaintext = decrypt_chunked(
        &SystemProvider,
        &dek,
        &blob.ciphertext,
        &blob.base_nonce,
        MIB as u32,
        3_145_728,
        None,
    )
    .unwrap();
    assert!(plaintext == data, "3 MiB roundtrip must reproduce the input exactly");
}

#[test]
fn swapped_salts_yield_unrelated_keys() {
    let pw = passphrase("correct-horse");
    let s1 = Salt::generate(&SystemProvider).unwrap();
    let s2 = Salt::generate(&SystemProvider).unwrap();
    assert_ne!(s1, s2);

    let content = derive_content_keys(&SystemProvider, &pw, &s1, 100_000).unwrap();
    let proof = derive_unlock_proof(&SystemProvider, &pw, &s2, 100_000).unwrap();

    let swapped_content = derive_content_keys(&SystemProvider, &pw, &s2, 100_000).unwrap();
    let swapped_proof = derive_unlock_proof(&SystemProvider, &pw, &s1, 100_000).unwrap();
    assert_ne!(proof.as_bytes(), swapped_proof.as_bytes());

    let dek = Dek::generate(&SystemProvider).unwrap();
    let wrapped = wrap_dek(&SystemProvider, &dek, &content.kek).unwrap();

    assert!(unwrap_dek(&SystemProvider, &wrapped, &content.kek).is_ok());
    assert!(matches!(
        unwrap_dek(&SystemProvider, &wrapped, &swapped_content.kek),
        Err(CryptoError::UnwrapFailed)
    ));
}

#[test]
fn sender_enrolls_recipient_unlocks_and_opens() {
    let config = CryptoConfig {
        iterations: 10_000,
        ..CryptoConfig::default()
    };
    let secret = ServerSecret::new(vec![0x42; 32]).unwrap();

    // sender
    let pw = passphrase("correct-horse");
    let sealer = SealingSession::new(&SystemProvider, &pw, &config).unwrap();
    let verifier = compute_verifier(sealer.unlock_proof().as_bytes(), &secret).unwrap();
    let params = sealer.encryption_params(verifier.to_b64());
    let sealed = sealer
        .seal_file(
            &PlainFile {
                filename: "notes.txt".into(),
                mimetype: "text/plain".into(),
                data: make_data(MIB + 1),
            },
            None,
        )
        .unwrap();
    drop(sealer);

    // recipient proves knowledge without sending the passphrase
    let proof = unlock_proof_for(&SystemProvider, &pw, &params).unwrap();
    let stored = dropseal_crypto::Verifier::from_b64(&params.unlock_verifier_b64).unwrap();
    assert!(verify(proof.as_bytes(), stored.as_bytes(), &secret));

    let wrong = unlock_proof_for(&SystemProvider, &passphrase("correct-hors"), &params).unwrap();
    assert!(!verify(wrong.as_bytes(), stored.as_bytes(), &secret));

    let opener = OpeningSession::new(&SystemProvider, &pw, &params, &config).unwrap();
    let opened = opener
        .open_file(&sealed.record, &sealed.ciphertext, None)
        .unwrap();
    assert_eq!(opened.metadata.filename, "notes.txt");
    assert_eq!(opened.plaintext.len(), MIB + 1);
}

#[test]
fn wrong_passphrase_is_one_outward_error() {
    let config = CryptoConfig {
        iterations: 10_000,
        ..CryptoConfig::default()
    };
    let sealer = SealingSession::new(&SystemProvider, &passphrase("a"), &config).unwrap();
    let params = sealer.encryption_params(String::new());
    let sealed = sealer
        .seal_file(
            &PlainFile {
                filename: "f".into(),
                mimetype: "application/octet-stream".into(),
                data: vec![1, 2, 3],
            },
            None,
        )
        .unwrap();

    let opener = OpeningSession::new(&SystemProvider, &passphrase("b"), &params, &config).unwrap();
    let err: DropsealError = opener
        .open_file(&sealed.record, &sealed.ciphertext, None)
        .unwrap_err()
        .into();
    assert!(matches!(err, DropsealError::Authentication));
    assert_eq!(err.to_string(), "incorrect passphrase");
}

#[test]
fn record_with_equal_salts_rejected() {
    let config = CryptoConfig {
        iterations: 10_000,
        ..CryptoConfig::default()
    };
    let sealer = SealingSession::new(&SystemProvider, &passphrase("a"), &config).unwrap();
    let mut params = sealer.encryption_params(String::new());
    params.unlock_salt_b64 = params.encryption_salt_b64.clone();

    assert!(matches!(
        OpeningSession::new(&SystemProvider, &passphrase("a"), &params, &config),
        Err(CryptoError::Config(_))
    ));
}
