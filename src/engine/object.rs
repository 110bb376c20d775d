//! Object read/write path: put, get, copy, delete, per-object facets

use super::{StorageEngine, StorageError};
use crate::blob::ByteStream;
use crate::types::{
    mint_blob_id, mint_version_id, ObjectKind, ObjectVersion, PutMetadata, VersioningState,
    NULL_VERSION_ID,
};
use chrono::Utc;
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

/// A parsed `Range: bytes=...` request, before resolution against the
/// object's length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// `bytes=a-b` (both inclusive)
    FromTo(u64, u64),
    /// `bytes=a-`
    From(u64),
    /// `bytes=-n` (final n bytes)
    Suffix(u64),
}

impl RangeRequest {
    /// Resolve to `(offset, len, end_inclusive)` against a total length.
    fn resolve(self, total: u64) -> Result<(u64, u64, u64), StorageError> {
        let unsatisfiable = StorageError::InvalidRange { length: total };
        match self {
            RangeRequest::FromTo(start, end) => {
                if start > end || start >= total {
                    return Err(unsatisfiable);
                }
                let end = end.min(total - 1);
                Ok((start, end - start + 1, end))
            }
            RangeRequest::From(start) => {
                if start >= total {
                    return Err(unsatisfiable);
                }
                Ok((start, total - start, total - 1))
            }
            RangeRequest::Suffix(n) => {
                if n == 0 || total == 0 {
                    return Err(unsatisfiable);
                }
                let len = n.min(total);
                Ok((total - len, len, total - 1))
            }
        }
    }
}

/// Integrity checks applied to a streamed write before it commits.
#[derive(Debug, Default)]
pub struct PutChecks {
    /// Declared Content-Length (or decoded length for chunked bodies).
    pub content_length: Option<u64>,
    /// Fixed `x-amz-content-sha256` digest, when one was signed.
    pub sha256_hex: Option<String>,
    /// `Content-MD5` header, already decoded to hex.
    pub md5_hex: Option<String>,
}

/// Result of a committed write.
#[derive(Debug)]
pub struct PutOutcome {
    pub version: ObjectVersion,
    pub versioning: VersioningState,
}

/// An opened object body.
pub struct GetOutcome {
    pub body: ByteStream,
    /// `(first, last, total)` when a range was served.
    pub content_range: Option<(u64, u64, u64)>,
    pub content_length: u64,
}

/// What a delete actually did.
#[derive(Debug)]
pub enum DeleteOutcome {
    /// A delete marker row was inserted (versioned delete of the key).
    MarkerCreated { version_id: String },
    /// An explicit version (or the null version) was removed.
    VersionDeleted { version_id: String, was_marker: bool },
    /// Nothing matched; S3 still reports success.
    Noop,
}

impl StorageEngine {
    /// Store a single-part object. The body is staged and hashed first;
    /// the metadata row commits only after the staging file is fsynced,
    /// and the blob renames into place after the commit. A failed rename
    /// rolls the row back.
    #[instrument(skip(self, meta, body))]
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        meta: PutMetadata,
        body: ByteStream,
        checks: PutChecks,
    ) -> Result<PutOutcome, StorageError> {
        let record = self.bucket(bucket).await?;

        let staged = self.blobs.stage(bucket, body).await?;

        if let Some(expected) = checks.content_length {
            if staged.size != expected {
                self.blobs.discard(staged).await;
                return Err(StorageError::IncompleteBody);
            }
        }
        if let Some(expected) = &checks.sha256_hex {
            if !staged.sha256_hex.eq_ignore_ascii_case(expected) {
                self.blobs.discard(staged).await;
                return Err(StorageError::PayloadHashMismatch);
            }
        }
        if let Some(expected) = &checks.md5_hex {
            if !staged.md5_hex.eq_ignore_ascii_case(expected) {
                self.blobs.discard(staged).await;
                return Err(StorageError::DigestMismatch);
            }
        }

        let version_id = match record.versioning {
            VersioningState::Enabled => mint_version_id(),
            _ => NULL_VERSION_ID.to_string(),
        };

        let blob_id = mint_blob_id();
        let shard = &blob_id[..2];
        let blob_path = format!("buckets/{bucket}/objects/{shard}/{blob_id}");

        let row = ObjectVersion {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id,
            is_latest: true,
            kind: ObjectKind::Regular,
            size: staged.size,
            etag: staged.md5_hex.clone(),
            content_type: meta.content_type,
            user_metadata: meta.user_metadata,
            system_metadata: meta.system_metadata,
            tags: meta.tags,
            acl: meta.acl,
            retention: None,
            legal_hold: false,
            blob_path: Some(blob_path),
            last_modified: Utc::now(),
        };

        let displaced = {
            let row = row.clone();
            self.with_meta(move |m| m.put_object_version(&row)).await?
        };

        if let Err(e) = self.blobs.publish_object(bucket, staged, &blob_id).await {
            // Compensate: the row must not point at a blob that never
            // arrived.
            warn!(error = %e, "blob publish failed, rolling back version row");
            let (b, k, v) = (row.bucket.clone(), row.key.clone(), row.version_id.clone());
            let _ = self
                .with_meta(move |m| m.delete_version(&b, &k, &v))
                .await;
            return Err(e);
        }

        if let Some(old) = displaced {
            self.blobs.remove(&old).await;
        }

        debug!(etag = %row.etag, size = row.size, "object stored");
        Ok(PutOutcome {
            version: row,
            versioning: record.versioning,
        })
    }

    /// Resolve `(bucket, key, optional version)` to its version row.
    ///
    /// A delete marker resolves to `DeleteMarkerFound` so the wire layer
    /// can attach the `x-amz-delete-marker` header to its 404.
    pub async fn lookup(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectVersion, StorageError> {
        self.bucket(bucket).await?;

        let (b, k) = (bucket.to_string(), key.to_string());
        let row = match version_id {
            Some(vid) => {
                let vid = vid.to_string();
                self.with_meta(move |m| m.get_version(&b, &k, &vid)).await?
            }
            None => self.with_meta(move |m| m.get_latest(&b, &k)).await?,
        };

        let row = row.ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?;
        if row.is_delete_marker() {
            return Err(StorageError::DeleteMarkerFound {
                version_id: row.version_id,
            });
        }
        Ok(row)
    }

    /// Open a resolved version's bytes, optionally a single range.
    pub async fn open_object(
        &self,
        version: &ObjectVersion,
        range: Option<RangeRequest>,
    ) -> Result<GetOutcome, StorageError> {
        let blob_path = version
            .blob_path
            .as_deref()
            .ok_or_else(|| StorageError::ObjectNotFound(version.key.clone()))?;

        match range {
            Some(req) => {
                let (offset, len, end) = req.resolve(version.size)?;
                let body = self.blobs.open(blob_path, Some((offset, len))).await?;
                Ok(GetOutcome {
                    body,
                    content_range: Some((offset, end, version.size)),
                    content_length: len,
                })
            }
            None => {
                let body = self.blobs.open(blob_path, None).await?;
                Ok(GetOutcome {
                    body,
                    content_range: None,
                    content_length: version.size,
                })
            }
        }
    }

    /// Server-side copy. The destination row carries the source's ETag,
    /// including composite multipart ETags, while the bytes are restaged
    /// into a fresh blob so no two rows ever share a file.
    #[instrument(skip(self, replace_meta))]
    pub async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        src_version: Option<&str>,
        dst_bucket: &str,
        dst_key: &str,
        replace_meta: Option<PutMetadata>,
    ) -> Result<PutOutcome, StorageError> {
        let source = self.lookup(src_bucket, src_key, src_version).await?;
        let record = self.bucket(dst_bucket).await?;

        let src_blob = source
            .blob_path
            .as_deref()
            .ok_or_else(|| StorageError::ObjectNotFound(src_key.to_string()))?;

        let body = self.blobs.open(src_blob, None).await?;
        let staged = self.blobs.stage(dst_bucket, body).await?;

        let version_id = match record.versioning {
            VersioningState::Enabled => mint_version_id(),
            _ => NULL_VERSION_ID.to_string(),
        };

        let blob_id = mint_blob_id();
        let shard = &blob_id[..2];
        let blob_path = format!("buckets/{dst_bucket}/objects/{shard}/{blob_id}");

        let (content_type, user_metadata, system_metadata, tags, acl) = match replace_meta {
            Some(meta) => (
                meta.content_type,
                meta.user_metadata,
                meta.system_metadata,
                meta.tags,
                meta.acl,
            ),
            None => (
                source.content_type.clone(),
                source.user_metadata.clone(),
                source.system_metadata.clone(),
                source.tags.clone(),
                None,
            ),
        };

        let row = ObjectVersion {
            bucket: dst_bucket.to_string(),
            key: dst_key.to_string(),
            version_id,
            is_latest: true,
            kind: ObjectKind::Regular,
            size: staged.size,
            etag: source.etag.clone(),
            content_type,
            user_metadata,
            system_metadata,
            tags,
            acl,
            retention: None,
            legal_hold: false,
            blob_path: Some(blob_path),
            last_modified: Utc::now(),
        };

        let displaced = {
            let row = row.clone();
            self.with_meta(move |m| m.put_object_version(&row)).await?
        };

        if let Err(e) = self.blobs.publish_object(dst_bucket, staged, &blob_id).await {
            warn!(error = %e, "copy publish failed, rolling back version row");
            let (b, k, v) = (row.bucket.clone(), row.key.clone(), row.version_id.clone());
            let _ = self
                .with_meta(move |m| m.delete_version(&b, &k, &v))
                .await;
            return Err(e);
        }

        if let Some(old) = displaced {
            self.blobs.remove(&old).await;
        }

        Ok(PutOutcome {
            version: row,
            versioning: record.versioning,
        })
    }

    /// Delete an object or one of its versions.
    #[instrument(skip(self))]
    pub async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<DeleteOutcome, StorageError> {
        let record = self.bucket(bucket).await?;

        // Explicit version: remove exactly that row.
        if let Some(vid) = version_id {
            let (b, k, v) = (bucket.to_string(), key.to_string(), vid.to_string());
            let removed = self
                .with_meta(move |m| m.delete_version(&b, &k, &v))
                .await?;
            return match removed {
                Some(row) => {
                    if let Some(blob) = &row.blob_path {
                        self.blobs.remove(blob).await;
                    }
                    let was_marker = row.is_delete_marker();
                    Ok(DeleteOutcome::VersionDeleted {
                        version_id: row.version_id,
                        was_marker,
                    })
                }
                None => Ok(DeleteOutcome::Noop),
            };
        }

        match record.versioning {
            // Versioned delete: the key stays, hidden behind a marker.
            VersioningState::Enabled => {
                let marker = delete_marker_row(bucket, key, mint_version_id());
                let version_id = marker.version_id.clone();
                self.with_meta(move |m| m.put_object_version(&marker))
                    .await?;
                Ok(DeleteOutcome::MarkerCreated { version_id })
            }
            // Suspended: the marker takes the null slot, displacing any
            // null version's bytes.
            VersioningState::Suspended => {
                let marker = delete_marker_row(bucket, key, NULL_VERSION_ID.to_string());
                let displaced = self
                    .with_meta(move |m| m.put_object_version(&marker))
                    .await?;
                if let Some(old) = displaced {
                    self.blobs.remove(&old).await;
                }
                Ok(DeleteOutcome::MarkerCreated {
                    version_id: NULL_VERSION_ID.to_string(),
                })
            }
            // Unversioned: the row and its bytes go away.
            VersioningState::Unversioned => {
                let (b, k) = (bucket.to_string(), key.to_string());
                let removed = self
                    .with_meta(move |m| m.delete_version(&b, &k, NULL_VERSION_ID))
                    .await?;
                match removed {
                    Some(row) => {
                        if let Some(blob) = &row.blob_path {
                            self.blobs.remove(blob).await;
                        }
                        let was_marker = row.is_delete_marker();
                        Ok(DeleteOutcome::VersionDeleted {
                            version_id: row.version_id,
                            was_marker,
                        })
                    }
                    None => Ok(DeleteOutcome::Noop),
                }
            }
        }
    }

    // === Per-object facets (tagging, ACL, retention, legal hold) ===
    //
    // Stored on the version row; resolution picks the latest version
    // unless the caller addresses one explicitly.

    pub async fn object_facet(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        facet: &'static str,
    ) -> Result<(ObjectVersion, Option<String>), StorageError> {
        let row = self.lookup(bucket, key, version_id).await?;
        let value = match facet {
            "tags" => row.tags.clone(),
            "acl" => row.acl.clone(),
            "retention" => row.retention.clone(),
            _ => None,
        };
        Ok((row, value))
    }

    pub async fn set_object_facet(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        facet: &'static str,
        value: Option<String>,
    ) -> Result<ObjectVersion, StorageError> {
        let row = self.lookup(bucket, key, version_id).await?;
        let (b, k, v) = (row.bucket.clone(), row.key.clone(), row.version_id.clone());
        self.with_meta(move |m| m.update_object_facet(&b, &k, &v, facet, value.as_deref()))
            .await?;
        Ok(row)
    }

    pub async fn set_legal_hold(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        on: bool,
    ) -> Result<ObjectVersion, StorageError> {
        let row = self.lookup(bucket, key, version_id).await?;
        let (b, k, v) = (row.bucket.clone(), row.key.clone(), row.version_id.clone());
        self.with_meta(move |m| m.set_legal_hold(&b, &k, &v, on))
            .await?;
        Ok(row)
    }
}

fn delete_marker_row(bucket: &str, key: &str, version_id: String) -> ObjectVersion {
    ObjectVersion {
        bucket: bucket.to_string(),
        key: key.to_string(),
        version_id,
        is_latest: true,
        kind: ObjectKind::DeleteMarker,
        size: 0,
        etag: String::new(),
        content_type: None,
        user_metadata: HashMap::new(),
        system_metadata: Default::default(),
        tags: None,
        acl: None,
        retention: None,
        legal_hold: false,
        blob_path: None,
        last_modified: Utc::now(),
    }
}
