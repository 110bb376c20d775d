//! Multipart upload lifecycle: create, upload parts, list, complete, abort
//!
//! Part bytes are staged on disk under the upload's directory and recorded
//! as rows; nothing is buffered in memory. CompleteMultipartUpload streams
//! the concatenation into a fresh blob, derives the composite ETag from
//! the per-part MD5s recorded at upload time, and publishes the object in
//! one metadata transaction that also retires the upload.

use super::object::{PutChecks, PutOutcome};
use super::{StorageEngine, StorageError, MAX_PART_NUMBER, MIN_PART_SIZE};
use crate::blob::ByteStream;
use crate::types::{
    mint_blob_id, mint_version_id, MultipartPart, MultipartUpload, ObjectKind, ObjectVersion,
    PutMetadata, VersioningState, NULL_VERSION_ID,
};
use chrono::Utc;
use md5::{Digest, Md5};
use tracing::{debug, instrument, warn};

/// One entry of a CompleteMultipartUpload request body.
#[derive(Debug, Clone)]
pub struct CompletedPart {
    pub part_number: u32,
    /// ETag as the client sent it; quotes are ignored for comparison.
    pub etag: String,
}

#[derive(Debug)]
pub struct ListPartsResult {
    pub upload: MultipartUpload,
    pub parts: Vec<MultipartPart>,
    pub is_truncated: bool,
    pub next_part_number_marker: Option<u32>,
}

#[derive(Debug)]
pub struct ListUploadsResult {
    pub uploads: Vec<MultipartUpload>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
}

impl StorageEngine {
    #[instrument(skip(self, meta))]
    pub async fn create_upload(
        &self,
        bucket: &str,
        key: &str,
        meta: PutMetadata,
    ) -> Result<MultipartUpload, StorageError> {
        self.bucket(bucket).await?;

        let upload = MultipartUpload {
            upload_id: mint_upload_id(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            initiated_at: Utc::now(),
            content_type: meta.content_type,
            user_metadata: meta.user_metadata,
            tags: meta.tags,
            acl: meta.acl,
        };

        {
            let upload = upload.clone();
            self.with_meta(move |m| m.create_upload(&upload)).await?;
        }
        debug!(upload_id = %upload.upload_id, "multipart upload created");
        Ok(upload)
    }

    /// Resolve an upload id and check it belongs to `(bucket, key)`.
    async fn resolve_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<MultipartUpload, StorageError> {
        self.bucket(bucket).await?;
        let id = upload_id.to_string();
        let upload = self
            .with_meta(move |m| m.get_upload(&id))
            .await?
            .ok_or_else(|| StorageError::UploadNotFound(upload_id.to_string()))?;
        if upload.bucket != bucket || upload.key != key {
            return Err(StorageError::UploadNotFound(upload_id.to_string()));
        }
        Ok(upload)
    }

    /// Stage one part. Re-uploading a part number replaces the previous
    /// bytes. Returns the part's quoted ETag.
    #[instrument(skip(self, body))]
    pub async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: ByteStream,
        checks: PutChecks,
    ) -> Result<String, StorageError> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(StorageError::InvalidPart(format!(
                "Part number must be between 1 and {MAX_PART_NUMBER}"
            )));
        }
        self.resolve_upload(bucket, key, upload_id).await?;

        let staged = self.blobs.stage(bucket, body).await?;
        if let Some(expected) = checks.content_length {
            if staged.size != expected {
                self.blobs.discard(staged).await;
                return Err(StorageError::IncompleteBody);
            }
        }
        if let Some(expected) = &checks.md5_hex {
            if !staged.md5_hex.eq_ignore_ascii_case(expected) {
                self.blobs.discard(staged).await;
                return Err(StorageError::DigestMismatch);
            }
        }

        let etag = staged.md5_hex.clone();
        let size = staged.size;
        let blob_path = self
            .blobs
            .publish_part(bucket, staged, upload_id, part_number)
            .await?;

        let part = MultipartPart {
            part_number,
            etag: etag.clone(),
            size,
            blob_path,
            uploaded_at: Utc::now(),
        };
        let displaced = {
            let id = upload_id.to_string();
            self.with_meta(move |m| m.put_part(&id, &part)).await?
        };
        // Overwriting re-uses the same staging path, so a displaced blob
        // only exists when the old row pointed elsewhere.
        if let Some(old) = displaced {
            if old != format!("buckets/{bucket}/uploads/{upload_id}/{part_number}") {
                self.blobs.remove(&old).await;
            }
        }

        Ok(format!("\"{etag}\""))
    }

    /// Copy an existing object version in as a part.
    #[instrument(skip(self))]
    pub async fn upload_part_copy(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        src_bucket: &str,
        src_key: &str,
        src_version: Option<&str>,
    ) -> Result<(String, chrono::DateTime<Utc>), StorageError> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(StorageError::InvalidPart(format!(
                "Part number must be between 1 and {MAX_PART_NUMBER}"
            )));
        }
        self.resolve_upload(bucket, key, upload_id).await?;
        let source = self.lookup(src_bucket, src_key, src_version).await?;
        let src_blob = source
            .blob_path
            .as_deref()
            .ok_or_else(|| StorageError::ObjectNotFound(src_key.to_string()))?;

        let body = self.blobs.open(src_blob, None).await?;
        let staged = self.blobs.stage(bucket, body).await?;
        let etag = staged.md5_hex.clone();
        let size = staged.size;
        let blob_path = self
            .blobs
            .publish_part(bucket, staged, upload_id, part_number)
            .await?;

        let part = MultipartPart {
            part_number,
            etag: etag.clone(),
            size,
            blob_path,
            uploaded_at: Utc::now(),
        };
        let last_modified = part.uploaded_at;
        {
            let id = upload_id.to_string();
            self.with_meta(move |m| m.put_part(&id, &part)).await?;
        }
        Ok((format!("\"{etag}\""), last_modified))
    }

    pub async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: usize,
    ) -> Result<ListPartsResult, StorageError> {
        let upload = self.resolve_upload(bucket, key, upload_id).await?;

        let mut parts = {
            let id = upload_id.to_string();
            self.with_meta(move |m| m.list_parts(&id, part_number_marker, max_parts + 1))
                .await?
        };
        let is_truncated = parts.len() > max_parts;
        if is_truncated {
            parts.truncate(max_parts);
        }
        let next_part_number_marker = if is_truncated {
            parts.last().map(|p| p.part_number)
        } else {
            None
        };

        Ok(ListPartsResult {
            upload,
            parts,
            is_truncated,
            next_part_number_marker,
        })
    }

    pub async fn list_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        key_marker: &str,
        upload_id_marker: &str,
        max_uploads: usize,
    ) -> Result<ListUploadsResult, StorageError> {
        self.bucket(bucket).await?;

        let mut uploads = {
            let (b, p, km, um) = (
                bucket.to_string(),
                prefix.to_string(),
                key_marker.to_string(),
                upload_id_marker.to_string(),
            );
            self.with_meta(move |m| m.list_uploads_page(&b, &p, &km, &um, max_uploads + 1))
                .await?
        };
        let is_truncated = uploads.len() > max_uploads;
        if is_truncated {
            uploads.truncate(max_uploads);
        }
        let (next_key_marker, next_upload_id_marker) = if is_truncated {
            uploads
                .last()
                .map(|u| (Some(u.key.clone()), Some(u.upload_id.clone())))
                .unwrap_or((None, None))
        } else {
            (None, None)
        };

        Ok(ListUploadsResult {
            uploads,
            is_truncated,
            next_key_marker,
            next_upload_id_marker,
        })
    }

    /// Validate the submitted part list, assemble the final blob, and
    /// publish the object version while retiring the upload, in one
    /// metadata transaction.
    #[instrument(skip(self, requested))]
    pub async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        requested: &[CompletedPart],
    ) -> Result<PutOutcome, StorageError> {
        let upload = self.resolve_upload(bucket, key, upload_id).await?;
        let record = self.bucket(bucket).await?;

        if requested.is_empty() {
            return Err(StorageError::InvalidPart(
                "You must specify at least one part".to_string(),
            ));
        }
        // Part numbers must be strictly ascending.
        for window in requested.windows(2) {
            if window[0].part_number >= window[1].part_number {
                return Err(StorageError::InvalidPartOrder);
            }
        }

        let stored = {
            let id = upload_id.to_string();
            self.with_meta(move |m| m.all_parts(&id)).await?
        };

        let mut sources = Vec::with_capacity(requested.len());
        let mut md5_concat = Vec::with_capacity(requested.len() * 16);
        let mut total_size: u64 = 0;

        for (idx, want) in requested.iter().enumerate() {
            let part = stored
                .iter()
                .find(|p| p.part_number == want.part_number)
                .ok_or_else(|| {
                    StorageError::InvalidPart(format!(
                        "Part {} has not been uploaded",
                        want.part_number
                    ))
                })?;

            let requested_clean = want.etag.trim_matches('"');
            if requested_clean != part.etag {
                return Err(StorageError::InvalidPart(format!(
                    "ETag mismatch for part {}",
                    want.part_number
                )));
            }

            // Every part except the last must meet the 5 MiB floor.
            if idx + 1 < requested.len() && part.size < MIN_PART_SIZE {
                return Err(StorageError::EntityTooSmall);
            }

            let raw = hex::decode(&part.etag)
                .map_err(|_| StorageError::Other(format!("corrupt part etag: {}", part.etag)))?;
            md5_concat.extend_from_slice(&raw);
            total_size += part.size;
            sources.push(part.blob_path.clone());
        }

        // Composite ETag: MD5 over the concatenated raw part MD5s, dash,
        // part count.
        let etag = format!("{}-{}", hex::encode(Md5::digest(&md5_concat)), requested.len());

        let staged = self.blobs.stage_concat(bucket, &sources).await?;
        debug_assert_eq!(staged.size, total_size);

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
            size: total_size,
            etag,
            content_type: upload.content_type.clone(),
            user_metadata: upload.user_metadata.clone(),
            system_metadata: Default::default(),
            tags: upload.tags.clone(),
            acl: upload.acl.clone(),
            retention: None,
            legal_hold: false,
            blob_path: Some(blob_path),
            last_modified: Utc::now(),
        };

        let (displaced, part_blobs) = {
            let (row, id) = (row.clone(), upload_id.to_string());
            self.with_meta(move |m| m.complete_upload(&id, &row)).await?
        };

        if let Err(e) = self.blobs.publish_object(bucket, staged, &blob_id).await {
            warn!(error = %e, "assembled blob publish failed, rolling back version row");
            let (b, k, v) = (row.bucket.clone(), row.key.clone(), row.version_id.clone());
            let _ = self
                .with_meta(move |m| m.delete_version(&b, &k, &v))
                .await;
            return Err(e);
        }

        for blob in &part_blobs {
            self.blobs.remove(blob).await;
        }
        self.blobs.remove_upload_dir(bucket, upload_id).await;
        if let Some(old) = displaced {
            self.blobs.remove(&old).await;
        }

        debug!(etag = %row.etag, size = row.size, "multipart upload completed");
        Ok(PutOutcome {
            version: row,
            versioning: record.versioning,
        })
    }

    /// Drop an upload and every staged part.
    #[instrument(skip(self))]
    pub async fn abort_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.resolve_upload(bucket, key, upload_id).await?;

        let part_blobs = {
            let id = upload_id.to_string();
            self.with_meta(move |m| m.abort_upload(&id)).await?
        };
        for blob in &part_blobs {
            self.blobs.remove(blob).await;
        }
        self.blobs.remove_upload_dir(bucket, upload_id).await;
        debug!("multipart upload aborted");
        Ok(())
    }
}

/// Upload ids are random 32-hex-char tokens, opaque to clients.
fn mint_upload_id() -> String {
    mint_blob_id()
}
