//! Record and blob persistence against the memory and fs backends.

use dropseal_core::config::{StorageBackend, StorageConfig};
use dropseal_core::types::{BundleAccess, BundleRecord, EncryptionParams, FileRecord};
use dropseal_storage::{build_operator, BundleStore};

fn sample_record(bundle_id: &str, content_keys: &[&str]) -> BundleRecord {
    BundleRecord {
        bundle_id: bundle_id.into(),
        access: BundleAccess::Encrypted(EncryptionParams {
            encryption_salt_b64: "AAAAAAAAAAAAAAAAAAAAAA".into(),
            unlock_salt_b64: "AQEBAQEBAQEBAQEBAQEBAQ".into(),
            encryption_iterations: 600_000,
            encryption_chunk_size: 1_048_576,
            unlock_verifier_b64: "dmVyaWZpZXI".into(),
        }),
        created_at: 1_700_000_000,
        expires_at: Some(1_700_086_400),
        files: content_keys
            .iter()
            .map(|ck| FileRecord {
                content_key: ck.to_string(),
                wrapped_dek_b64: "d2Rlaw".into(),
                wrapped_dek_iv_b64: "aXY".into(),
                encrypted_metadata_b64: "bWV0YQ".into(),
                encrypted_metadata_iv_b64: "aXY".into(),
                base_nonce_b64: "bm9uY2U".into(),
                original_size: 42,
            })
            .collect(),
    }
}

#[tokio::test]
async fn record_and_blobs_roundtrip_in_memory() {
    let store = BundleStore::memory().unwrap();
    let record = sample_record("bundle-1", &["c1", "c2"]);

    store.put_blob("bundle-1", "c1", vec![0xAA; 100]).await.unwrap();
    store.put_blob("bundle-1", "c2", vec![0xBB; 10]).await.unwrap();
    store.put_record(&record).await.unwrap();

    let loaded = store.get_record("bundle-1").await.unwrap().unwrap();
    assert_eq!(loaded, record);
    assert_eq!(store.get_blob("bundle-1", "c2").await.unwrap(), vec![0xBB; 10]);

    assert!(store.get_record("bundle-2").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_bundle_removes_everything() {
    let store = BundleStore::memory().unwrap();
    store.put_blob("keep", "k1", vec![1]).await.unwrap();
    store.put_record(&sample_record("keep", &["k1"])).await.unwrap();
    store.put_blob("gone", "g1", vec![2]).await.unwrap();
    store.put_blob("gone", "g2", vec![3]).await.unwrap();
    store.put_record(&sample_record("gone", &["g1", "g2"])).await.unwrap();

    assert_eq!(store.list_bundles().await.unwrap(), vec!["gone", "keep"]);

    let removed = store.delete_bundle("gone").await.unwrap();
    assert_eq!(removed, 3);
    assert!(store.get_record("gone").await.unwrap().is_none());
    assert!(store.get_blob("gone", "g1").await.is_err());
    assert!(store.get_record("keep").await.unwrap().is_some());

    assert_eq!(store.delete_bundle("never-existed").await.unwrap(), 0);
}

#[tokio::test]
async fn fs_backend_streams_blob_from_file() {
    let root = tempfile::tempdir().unwrap();
    let cfg = StorageConfig {
        backend: StorageBackend::Fs,
        root: root.path().to_path_buf(),
        ..Default::default()
    };
    let store = BundleStore::new(build_operator(&cfg, None).unwrap());

    let staged = tempfile::NamedTempFile::new().unwrap();
    let payload: Vec<u8> = (0..2_500_000u32).map(|i| (i % 253) as u8).collect();
    std::fs::write(staged.path(), &payload).unwrap();

    let written = store
        .put_blob_file("fsb", "blob-0", staged.path())
        .await
        .unwrap();
    assert_eq!(written, payload.len() as u64);
    assert_eq!(store.get_blob("fsb", "blob-0").await.unwrap(), payload);

    let on_disk = root.path().join("bundles/fsb/blobs/blob-0");
    assert!(on_disk.exists());
}

#[tokio::test]
async fn corrupt_record_is_integrity_error() {
    let store = BundleStore::memory().unwrap();
    store
        .operator()
        .write(&BundleStore::record_key("bad"), b"{not json".to_vec())
        .await
        .unwrap();
    assert!(matches!(
        store.get_record("bad").await,
        Err(dropseal_core::DropsealError::Integrity(_))
    ));
}
