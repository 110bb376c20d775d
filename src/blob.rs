//! Filesystem blob store: staged writes, atomic publication, range reads
//!
//! Layout under the data directory:
//!
//! ```text
//! {root}/buckets/{bucket}/
//!   objects/{xx}/{blob_id}        # committed object blobs ({xx} = first two hex chars)
//!   uploads/{upload_id}/{part}    # staged multipart parts
//!   tmp/{random}                  # in-flight staging files
//! ```
//!
//! Writers always stage into `tmp/`, fsync, and rename into place only
//! after the metadata row commits, so readers never observe partial blobs.
//! The store only ever sees paths derived from ids it minted itself; user
//! input never reaches the filesystem.

use crate::engine::StorageError;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use md5::{Digest, Md5};
use sha2::Sha256;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// A byte stream feeding or leaving the blob store.
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// ENOSPC raw error code on Linux and macOS.
const ENOSPC: i32 = 28;

/// A client that stalls longer than this between body chunks loses its
/// in-flight write; the staging file is cleaned up on the spot.
const BODY_READ_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Convert an io::Error into StorageError, detecting disk-full (ENOSPC).
fn io_to_storage_error(e: std::io::Error) -> StorageError {
    if e.raw_os_error() == Some(ENOSPC) {
        StorageError::DiskFull
    } else {
        StorageError::Io(e)
    }
}

/// A fully written, fsynced staging file awaiting publication.
#[derive(Debug)]
pub struct StagedBlob {
    temp_path: PathBuf,
    pub size: u64,
    pub md5_hex: String,
    pub sha256_hex: String,
}

/// Filesystem blob store rooted at the configured data directory.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub async fn new(root: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(root.join("buckets"))
            .await
            .map_err(io_to_storage_error)?;
        Ok(Self { root })
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join("buckets").join(bucket)
    }

    /// Resolve a stored relative blob path to its absolute location.
    fn resolve(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Create the directory skeleton for a new bucket.
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let dir = self.bucket_dir(bucket);
        for sub in ["objects", "uploads", "tmp"] {
            fs::create_dir_all(dir.join(sub))
                .await
                .map_err(io_to_storage_error)?;
        }
        Ok(())
    }

    /// Remove a bucket's directory tree. Called only after the metadata
    /// store confirmed the bucket is empty.
    pub async fn remove_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        match fs::remove_dir_all(self.bucket_dir(bucket)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_to_storage_error(e)),
        }
    }

    /// Stream a request body into a staging file, hashing MD5 and SHA-256
    /// on the way through, then fsync. The file is not yet visible to
    /// readers; `publish_*` renames it into place, `discard` removes it.
    pub async fn stage(
        &self,
        bucket: &str,
        mut body: ByteStream,
    ) -> Result<StagedBlob, StorageError> {
        let tmp_dir = self.bucket_dir(bucket).join("tmp");
        fs::create_dir_all(&tmp_dir)
            .await
            .map_err(io_to_storage_error)?;
        let temp_path = tmp_dir.join(crate::types::mint_blob_id());

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(io_to_storage_error)?;
        let mut md5 = Md5::new();
        let mut sha256 = Sha256::new();
        let mut size: u64 = 0;

        let result: Result<(), StorageError> = async {
            loop {
                let next = tokio::time::timeout(BODY_READ_TIMEOUT, body.next())
                    .await
                    .map_err(|_| {
                        StorageError::BodyRead(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "timed out waiting for request body",
                        ))
                    })?;
                let Some(chunk) = next else { break };
                let chunk = chunk.map_err(StorageError::BodyRead)?;
                md5.update(&chunk);
                sha256.update(&chunk);
                size += chunk.len() as u64;
                file.write_all(&chunk).await.map_err(io_to_storage_error)?;
            }
            file.flush().await.map_err(io_to_storage_error)?;
            file.sync_all().await.map_err(io_to_storage_error)?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            // A failed or cancelled body read must not leave staging files
            // behind; the startup scavenger is only the fallback.
            drop(file);
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        Ok(StagedBlob {
            temp_path,
            size,
            md5_hex: hex::encode(md5.finalize()),
            sha256_hex: hex::encode(sha256.finalize()),
        })
    }

    /// Stage a concatenation of already-committed blobs (multipart
    /// assembly). Hashes are not recomputed; the composite ETag is derived
    /// from the per-part MD5s recorded at upload time.
    pub async fn stage_concat(
        &self,
        bucket: &str,
        sources: &[String],
    ) -> Result<StagedBlob, StorageError> {
        let tmp_dir = self.bucket_dir(bucket).join("tmp");
        fs::create_dir_all(&tmp_dir)
            .await
            .map_err(io_to_storage_error)?;
        let temp_path = tmp_dir.join(crate::types::mint_blob_id());

        let mut out = fs::File::create(&temp_path)
            .await
            .map_err(io_to_storage_error)?;
        let mut size: u64 = 0;

        let result: Result<(), StorageError> = async {
            for rel in sources {
                let mut part = fs::File::open(self.resolve(rel))
                    .await
                    .map_err(io_to_storage_error)?;
                size += tokio::io::copy(&mut part, &mut out)
                    .await
                    .map_err(io_to_storage_error)?;
            }
            out.flush().await.map_err(io_to_storage_error)?;
            out.sync_all().await.map_err(io_to_storage_error)?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            drop(out);
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        Ok(StagedBlob {
            temp_path,
            size,
            md5_hex: String::new(),
            sha256_hex: String::new(),
        })
    }

    /// Rename a staged blob into the committed objects tree. Returns the
    /// relative path to record in the metadata row.
    pub async fn publish_object(
        &self,
        bucket: &str,
        staged: StagedBlob,
        blob_id: &str,
    ) -> Result<String, StorageError> {
        let shard = &blob_id[..2];
        let rel = format!("buckets/{bucket}/objects/{shard}/{blob_id}");
        let dest = self.resolve(&rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(io_to_storage_error)?;
        }
        fs::rename(&staged.temp_path, &dest)
            .await
            .map_err(io_to_storage_error)?;
        debug!(path = %rel, size = staged.size, "published blob");
        Ok(rel)
    }

    /// Rename a staged blob into an upload's part directory.
    pub async fn publish_part(
        &self,
        bucket: &str,
        staged: StagedBlob,
        upload_id: &str,
        part_number: u32,
    ) -> Result<String, StorageError> {
        let rel = format!("buckets/{bucket}/uploads/{upload_id}/{part_number}");
        let dest = self.resolve(&rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(io_to_storage_error)?;
        }
        fs::rename(&staged.temp_path, &dest)
            .await
            .map_err(io_to_storage_error)?;
        Ok(rel)
    }

    /// Remove a staging file that will not be published.
    pub async fn discard(&self, staged: StagedBlob) {
        if let Err(e) = fs::remove_file(&staged.temp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %staged.temp_path.display(), error = %e, "failed to remove staging file");
            }
        }
    }

    /// Open a committed blob for streaming, optionally a single byte range.
    pub async fn open(
        &self,
        rel: &str,
        range: Option<(u64, u64)>,
    ) -> Result<ByteStream, StorageError> {
        let mut file = fs::File::open(self.resolve(rel))
            .await
            .map_err(io_to_storage_error)?;
        match range {
            Some((offset, len)) => {
                file.seek(std::io::SeekFrom::Start(offset))
                    .await
                    .map_err(io_to_storage_error)?;
                let limited = tokio::io::AsyncReadExt::take(file, len);
                Ok(ReaderStream::new(limited).boxed())
            }
            None => Ok(ReaderStream::new(file).boxed()),
        }
    }

    /// Unlink a committed blob. Missing files are fine: unlinks are
    /// replayed after crash recovery.
    pub async fn remove(&self, rel: &str) {
        match fs::remove_file(self.resolve(rel)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %rel, error = %e, "failed to unlink blob"),
        }
    }

    /// Remove an upload's whole part directory.
    pub async fn remove_upload_dir(&self, bucket: &str, upload_id: &str) {
        let dir = self.bucket_dir(bucket).join("uploads").join(upload_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %dir.display(), error = %e, "failed to remove upload dir"),
        }
    }

    /// Startup scavenger: drop every leftover staging file and any upload
    /// directory without a live metadata row. Covers writes interrupted
    /// between staging and commit.
    pub async fn scavenge(&self, live_upload_ids: &HashSet<String>) {
        let buckets_dir = self.root.join("buckets");
        let mut buckets = match fs::read_dir(&buckets_dir).await {
            Ok(rd) => rd,
            Err(_) => return,
        };

        let mut removed_tmp = 0usize;
        let mut removed_uploads = 0usize;

        while let Ok(Some(entry)) = buckets.next_entry().await {
            let bucket_dir = entry.path();

            removed_tmp += clear_dir(&bucket_dir.join("tmp")).await;

            let uploads_dir = bucket_dir.join("uploads");
            let mut uploads = match fs::read_dir(&uploads_dir).await {
                Ok(rd) => rd,
                Err(_) => continue,
            };
            while let Ok(Some(upload)) = uploads.next_entry().await {
                let id = upload.file_name().to_string_lossy().into_owned();
                if !live_upload_ids.contains(&id) {
                    if fs::remove_dir_all(upload.path()).await.is_ok() {
                        removed_uploads += 1;
                    }
                }
            }
        }

        if removed_tmp > 0 || removed_uploads > 0 {
            info!(
                staging_files = removed_tmp,
                upload_dirs = removed_uploads,
                "scavenged orphaned blob data from interrupted writes"
            );
        }
    }
}

/// Remove every file directly inside `dir`; returns how many went away.
async fn clear_dir(dir: &Path) -> usize {
    let mut removed = 0;
    let mut entries = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(_) => return 0,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if fs::remove_file(entry.path()).await.is_ok() {
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    fn byte_stream(chunks: Vec<&'static [u8]>) -> ByteStream {
        stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from_static(c)))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    async fn collect(mut s: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = s.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_stage_publish_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf()).await.unwrap();
        store.ensure_bucket("b1").await.unwrap();

        let staged = store
            .stage("b1", byte_stream(vec![b"Hello, ", b"World!\n"]))
            .await
            .unwrap();
        assert_eq!(staged.size, 14);
        assert_eq!(staged.md5_hex, "746308829575e17c3331bbcb00c0898b");

        let rel = store
            .publish_object("b1", staged, "abcdef0123456789abcdef0123456789")
            .await
            .unwrap();
        assert!(rel.starts_with("buckets/b1/objects/ab/"));

        let body = collect(store.open(&rel, None).await.unwrap()).await;
        assert_eq!(body, b"Hello, World!\n");
    }

    #[tokio::test]
    async fn test_open_range() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf()).await.unwrap();
        store.ensure_bucket("b1").await.unwrap();

        let staged = store
            .stage("b1", byte_stream(vec![b"0123456789"]))
            .await
            .unwrap();
        let rel = store
            .publish_object("b1", staged, "ffffffffffffffffffffffffffffffff")
            .await
            .unwrap();

        let body = collect(store.open(&rel, Some((2, 3))).await.unwrap()).await;
        assert_eq!(body, b"234");
    }

    #[tokio::test]
    async fn test_stage_concat() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf()).await.unwrap();
        store.ensure_bucket("b1").await.unwrap();

        let a = store.stage("b1", byte_stream(vec![b"aaa"])).await.unwrap();
        let pa = store.publish_part("b1", a, "u1", 1).await.unwrap();
        let b = store.stage("b1", byte_stream(vec![b"bb"])).await.unwrap();
        let pb = store.publish_part("b1", b, "u1", 2).await.unwrap();

        let combined = store
            .stage_concat("b1", &[pa.clone(), pb.clone()])
            .await
            .unwrap();
        assert_eq!(combined.size, 5);
        let rel = store
            .publish_object("b1", combined, "00112233445566778899aabbccddeeff")
            .await
            .unwrap();
        let body = collect(store.open(&rel, None).await.unwrap()).await;
        assert_eq!(body, b"aaabb");
    }

    #[tokio::test]
    async fn test_failed_stage_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf()).await.unwrap();
        store.ensure_bucket("b1").await.unwrap();

        let failing: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "client went away",
            )),
        ])
        .boxed();

        assert!(store.stage("b1", failing).await.is_err());

        let tmp_dir = dir.path().join("buckets/b1/tmp");
        let leftover = std::fs::read_dir(&tmp_dir).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_scavenge_removes_orphans() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf()).await.unwrap();
        store.ensure_bucket("b1").await.unwrap();

        std::fs::write(dir.path().join("buckets/b1/tmp/orphan"), b"x").unwrap();
        std::fs::create_dir_all(dir.path().join("buckets/b1/uploads/dead")).unwrap();
        std::fs::create_dir_all(dir.path().join("buckets/b1/uploads/live")).unwrap();

        let mut live = HashSet::new();
        live.insert("live".to_string());
        store.scavenge(&live).await;

        assert!(!dir.path().join("buckets/b1/tmp/orphan").exists());
        assert!(!dir.path().join("buckets/b1/uploads/dead").exists());
        assert!(dir.path().join("buckets/b1/uploads/live").exists());
    }
}
