//! Bundle store: records and ciphertext blobs under one prefix per bundle
//!
//! Layout:
//! ```text
//! bundles/{bundle_id}/bundle.json
//! bundles/{bundle_id}/blobs/{content_key}
//! ```

use std::path::Path;

use opendal::{ErrorKind, Operator};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use dropseal_core::types::BundleRecord;
use dropseal_core::{DropsealError, DropsealResult};

const PREFIX: &str = "bundles";

/// Upload buffer size for streamed blobs
const UPLOAD_BUFFER: usize = 1_048_576;

#[derive(Clone, Debug)]
pub struct BundleStore {
    op: Operator,
}

fn storage_err(context: &str, e: opendal::Error) -> DropsealError {
    DropsealError::Storage(format!("{context}: {e}"))
}

/// Reject ids that could escape their prefix.
fn check_segment(kind: &str, id: &str) -> DropsealResult<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(DropsealError::InvalidRequest(format!("invalid {kind}: {id:?}")))
    }
}

impl BundleStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    /// In-process store, used by tests and dry runs.
    pub fn memory() -> DropsealResult<Self> {
        let op = Operator::new(opendal::services::Memory::default())
            .map_err(|e| storage_err("creating memory operator", e))?
            .finish();
        Ok(Self::new(op))
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    pub fn bundle_prefix(bundle_id: &str) -> String {
        format!("{PREFIX}/{bundle_id}/")
    }

    pub fn record_key(bundle_id: &str) -> String {
        format!("{PREFIX}/{bundle_id}/bundle.json")
    }

    pub fn blob_key(bundle_id: &str, content_key: &str) -> String {
        format!("{PREFIX}/{bundle_id}/blobs/{content_key}")
    }

    pub async fn put_blob(
        &self,
        bundle_id: &str,
        content_key: &str,
        ciphertext: Vec<u8>,
    ) -> DropsealResult<()> {
        check_segment("bundle id", bundle_id)?;
        check_segment("content key", content_key)?;
        let key = Self::blob_key(bundle_id, content_key);
        let bytes = ciphertext.len();
        self.op
            .write(&key, ciphertext)
            .await
            .map_err(|e| storage_err(&format!("writing {key}"), e))?;
        debug!(key = %key, bytes, "stored blob");
        Ok(())
    }

    /// Stream a local ciphertext file into the store without buffering it whole.
    pub async fn put_blob_file(
        &self,
        bundle_id: &str,
        content_key: &str,
        path: &Path,
    ) -> DropsealResult<u64> {
        check_segment("bundle id", bundle_id)?;
        check_segment("content key", content_key)?;
        let key = Self::blob_key(bundle_id, content_key);

        let mut file = tokio::fs::File::open(path).await?;
        let mut writer = self
            .op
            .writer(&key)
            .await
            .map_err(|e| storage_err(&format!("opening writer for {key}"), e))?;

        let mut total = 0u64;
        loop {
            let mut buf = vec![0u8; UPLOAD_BUFFER];
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            buf.truncate(n);
            total += n as u64;
            writer
                .write(buf)
                .await
                .map_err(|e| storage_err(&format!("writing {key}"), e))?;
        }
        writer
            .close()
            .await
            .map_err(|e| storage_err(&format!("finishing {key}"), e))?;

        debug!(key = %key, bytes = total, "stored blob");
        Ok(total)
    }

    /// Fetch a blob. A record that names a missing blob is an integrity error.
    pub async fn get_blob(&self, bundle_id: &str, content_key: &str) -> DropsealResult<Vec<u8>> {
        check_segment("bundle id", bundle_id)?;
        check_segment("content key", content_key)?;
        let key = Self::blob_key(bundle_id, content_key);
        match self.op.read(&key).await {
            Ok(buf) => Ok(buf.to_vec()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(DropsealError::Integrity(format!(
                "blob {content_key} of bundle {bundle_id} is missing"
            ))),
            Err(e) => Err(storage_err(&format!("reading {key}"), e)),
        }
    }

    pub async fn put_record(&self, record: &BundleRecord) -> DropsealResult<()> {
        check_segment("bundle id", &record.bundle_id)?;
        for file in &record.files {
            check_segment("content key", &file.content_key)?;
        }
        let key = Self::record_key(&record.bundle_id);
        self.op
            .write(&key, record.to_json()?)
            .await
            .map_err(|e| storage_err(&format!("writing {key}"), e))?;
        info!(bundle = %record.bundle_id, files = record.files.len(), "stored bundle record");
        Ok(())
    }

    /// `None` if no such bundle.
    pub async fn get_record(&self, bundle_id: &str) -> DropsealResult<Option<BundleRecord>> {
        check_segment("bundle id", bundle_id)?;
        let key = Self::record_key(bundle_id);
        match self.op.read(&key).await {
            Ok(buf) => BundleRecord::from_json(&buf.to_vec()).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(&format!("reading {key}"), e)),
        }
    }

    /// Delete a bundle's record and all its blobs. Returns the number of
    /// objects removed.
    pub async fn delete_bundle(&self, bundle_id: &str) -> DropsealResult<usize> {
        check_segment("bundle id", bundle_id)?;
        let prefix = Self::bundle_prefix(bundle_id);
        let entries = match self.op.list_with(&prefix).recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(storage_err(&format!("listing {prefix}"), e)),
        };

        let mut removed = 0;
        for entry in entries.iter().filter(|e| !e.path().ends_with('/')) {
            self.op
                .delete(entry.path())
                .await
                .map_err(|e| storage_err(&format!("deleting {}", entry.path()), e))?;
            removed += 1;
        }
        info!(bundle = %bundle_id, removed, "deleted bundle");
        Ok(removed)
    }

    /// Ids of all stored bundles.
    pub async fn list_bundles(&self) -> DropsealResult<Vec<String>> {
        let root = format!("{PREFIX}/");
        let entries = match self.op.list(&root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(&format!("listing {root}"), e)),
        };
        let mut ids: Vec<String> = entries
            .iter()
            .filter_map(|e| {
                e.path()
                    .strip_prefix(root.as_str())
                    .and_then(|rest| rest.strip_suffix('/'))
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}
