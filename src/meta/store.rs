//! SQLite-backed metadata store
//!
//! One writer connection behind a mutex; a small pool of read-only
//! connections for lookups and listings. The database runs in WAL mode so
//! crash recovery is journal-based and an off-process replication sidecar
//! can tail the journal file; the store never takes an exclusive file
//! lock outside individual write transactions.
//!
//! Every multi-row state change (latest flips, multipart completion,
//! bucket deletion) happens inside a single transaction here, so callers
//! observe snapshots and never a half-applied write.

use crate::engine::StorageError;
use crate::types::{
    MultipartPart, MultipartUpload, ObjectKind, ObjectSummary, ObjectVersion, SystemMetadata,
    VersioningState,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, Transaction};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Number of pooled read-only connections.
const READER_POOL_SIZE: usize = 4;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS buckets (
  name        TEXT PRIMARY KEY,
  created_at  TEXT NOT NULL,
  versioning  TEXT NOT NULL DEFAULT 'unversioned'
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS bucket_configs (
  bucket TEXT NOT NULL,
  name   TEXT NOT NULL,
  body   BLOB NOT NULL,
  PRIMARY KEY (bucket, name)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS objects (
  bucket          TEXT NOT NULL,
  key             TEXT NOT NULL,
  version_id      TEXT NOT NULL,
  is_latest       INTEGER NOT NULL,
  kind            TEXT NOT NULL,
  size            INTEGER NOT NULL,
  etag            TEXT NOT NULL,
  content_type    TEXT,
  user_metadata   TEXT NOT NULL,
  system_metadata TEXT NOT NULL,
  tags            TEXT,
  acl             TEXT,
  retention       TEXT,
  legal_hold      INTEGER NOT NULL DEFAULT 0,
  blob_path       TEXT,
  last_modified   TEXT NOT NULL,
  PRIMARY KEY (bucket, key, version_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS objects_by_key
  ON objects (bucket, key, last_modified DESC);

CREATE TABLE IF NOT EXISTS multipart_uploads (
  upload_id     TEXT PRIMARY KEY,
  bucket        TEXT NOT NULL,
  key           TEXT NOT NULL,
  initiated_at  TEXT NOT NULL,
  content_type  TEXT,
  user_metadata TEXT NOT NULL,
  tags          TEXT,
  acl           TEXT
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS uploads_by_key
  ON multipart_uploads (bucket, key, upload_id);

CREATE TABLE IF NOT EXISTS multipart_parts (
  upload_id   TEXT NOT NULL,
  part_number INTEGER NOT NULL,
  etag        TEXT NOT NULL,
  size        INTEGER NOT NULL,
  blob_path   TEXT NOT NULL,
  uploaded_at TEXT NOT NULL,
  PRIMARY KEY (upload_id, part_number)
) WITHOUT ROWID;
"#;

/// One bucket row.
#[derive(Debug, Clone)]
pub struct BucketRecord {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub versioning: VersioningState,
}

/// SQLite metadata store handle. Cheap to share via `Arc`.
pub struct MetaStore {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    path: PathBuf,
}

impl MetaStore {
    /// Open (creating if absent) the store at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Connection::open(path)?;
        apply_pragmas(&writer)?;
        writer.execute_batch(SCHEMA)?;

        let mut readers = Vec::with_capacity(READER_POOL_SIZE);
        for _ in 0..READER_POOL_SIZE {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            readers.push(Mutex::new(conn));
        }

        debug!(path = %path.display(), "metadata store opened");
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
            path: path.to_path_buf(),
        })
    }

    /// Path of the store file (the WAL sidecars live next to it).
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_reader<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StorageError> {
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx].lock();
        f(&conn).map_err(StorageError::from)
    }

    // === Buckets ===

    pub fn create_bucket(&self, name: &str, now: DateTime<Utc>) -> Result<(), StorageError> {
        let conn = self.writer.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO buckets (name, created_at, versioning) VALUES (?1, ?2, 'unversioned')",
            params![name, now.to_rfc3339()],
        )?;
        if inserted == 0 {
            return Err(StorageError::BucketAlreadyExists(name.to_string()));
        }
        Ok(())
    }

    pub fn get_bucket(&self, name: &str) -> Result<Option<BucketRecord>, StorageError> {
        self.with_reader(|conn| {
            conn.query_row(
                "SELECT name, created_at, versioning FROM buckets WHERE name = ?1",
                params![name],
                bucket_from_row,
            )
            .optional()
        })
    }

    pub fn list_buckets(&self) -> Result<Vec<BucketRecord>, StorageError> {
        self.with_reader(|conn| {
            let mut stmt =
                conn.prepare("SELECT name, created_at, versioning FROM buckets ORDER BY name")?;
            let rows = stmt.query_map([], bucket_from_row)?;
            rows.collect()
        })
    }

    /// Delete a bucket if it holds no version rows and no in-progress
    /// uploads. Config blobs go with it.
    pub fn delete_bucket(&self, name: &str) -> Result<(), StorageError> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction()?;

        let exists: bool = tx
            .query_row("SELECT 1 FROM buckets WHERE name = ?1", params![name], |_| {
                Ok(())
            })
            .optional()?
            .is_some();
        if !exists {
            return Err(StorageError::BucketNotFound(name.to_string()));
        }

        let objects: i64 = tx.query_row(
            "SELECT COUNT(*) FROM objects WHERE bucket = ?1",
            params![name],
            |r| r.get(0),
        )?;
        let uploads: i64 = tx.query_row(
            "SELECT COUNT(*) FROM multipart_uploads WHERE bucket = ?1",
            params![name],
            |r| r.get(0),
        )?;
        if objects > 0 || uploads > 0 {
            return Err(StorageError::BucketNotEmpty(name.to_string()));
        }

        tx.execute("DELETE FROM bucket_configs WHERE bucket = ?1", params![name])?;
        tx.execute("DELETE FROM buckets WHERE name = ?1", params![name])?;
        tx.commit()?;
        Ok(())
    }

    pub fn set_versioning(&self, name: &str, state: VersioningState) -> Result<(), StorageError> {
        let conn = self.writer.lock();
        let updated = conn.execute(
            "UPDATE buckets SET versioning = ?2 WHERE name = ?1",
            params![name, state.as_str()],
        )?;
        if updated == 0 {
            return Err(StorageError::BucketNotFound(name.to_string()));
        }
        Ok(())
    }

    // === Bucket configuration blobs (pass-through facets) ===

    pub fn put_bucket_config(
        &self,
        bucket: &str,
        facet: &str,
        body: &[u8],
    ) -> Result<(), StorageError> {
        let conn = self.writer.lock();
        conn.execute(
            "INSERT INTO bucket_configs (bucket, name, body) VALUES (?1, ?2, ?3)
             ON CONFLICT (bucket, name) DO UPDATE SET body = excluded.body",
            params![bucket, facet, body],
        )?;
        Ok(())
    }

    pub fn get_bucket_config(
        &self,
        bucket: &str,
        facet: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        self.with_reader(|conn| {
            conn.query_row(
                "SELECT body FROM bucket_configs WHERE bucket = ?1 AND name = ?2",
                params![bucket, facet],
                |r| r.get(0),
            )
            .optional()
        })
    }

    pub fn delete_bucket_config(&self, bucket: &str, facet: &str) -> Result<(), StorageError> {
        let conn = self.writer.lock();
        conn.execute(
            "DELETE FROM bucket_configs WHERE bucket = ?1 AND name = ?2",
            params![bucket, facet],
        )?;
        Ok(())
    }

    // === Object versions ===

    /// Commit a new object version. For the `null` version id this is an
    /// upsert that displaces any prior null row; in every case the new row
    /// becomes the single latest for its key. Returns the blob path of a
    /// displaced regular row, if any, so the caller can unlink it after
    /// commit.
    pub fn put_object_version(&self, row: &ObjectVersion) -> Result<Option<String>, StorageError> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction()?;
        let displaced = insert_version_tx(&tx, row)?;
        tx.commit()?;
        Ok(displaced)
    }

    pub fn get_latest(&self, bucket: &str, key: &str) -> Result<Option<ObjectVersion>, StorageError> {
        self.with_reader(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {OBJECT_COLS} FROM objects
                     WHERE bucket = ?1 AND key = ?2 AND is_latest = 1"
                ),
                params![bucket, key],
                object_from_row,
            )
            .optional()
        })
    }

    pub fn get_version(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<Option<ObjectVersion>, StorageError> {
        self.with_reader(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {OBJECT_COLS} FROM objects
                     WHERE bucket = ?1 AND key = ?2 AND version_id = ?3"
                ),
                params![bucket, key, version_id],
                object_from_row,
            )
            .optional()
        })
    }

    /// Remove one version row. If it carried `is_latest`, the most recent
    /// surviving row for the key is promoted. Returns the removed row so
    /// the caller can unlink its blob.
    pub fn delete_version(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<Option<ObjectVersion>, StorageError> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction()?;

        let removed = tx
            .query_row(
                &format!(
                    "SELECT {OBJECT_COLS} FROM objects
                     WHERE bucket = ?1 AND key = ?2 AND version_id = ?3"
                ),
                params![bucket, key, version_id],
                object_from_row,
            )
            .optional()?;

        let Some(removed) = removed else {
            return Ok(None);
        };

        tx.execute(
            "DELETE FROM objects WHERE bucket = ?1 AND key = ?2 AND version_id = ?3",
            params![bucket, key, version_id],
        )?;

        if removed.is_latest {
            tx.execute(
                "UPDATE objects SET is_latest = 1
                 WHERE bucket = ?1 AND key = ?2 AND version_id =
                   (SELECT version_id FROM objects WHERE bucket = ?1 AND key = ?2
                    ORDER BY last_modified DESC, version_id DESC LIMIT 1)",
                params![bucket, key],
            )?;
        }

        tx.commit()?;
        Ok(Some(removed))
    }

    /// Update one per-object facet column on an existing version row.
    /// `facet` must be one of the fixed column names; callers pass
    /// compile-time constants only.
    pub fn update_object_facet(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
        facet: &'static str,
        value: Option<&str>,
    ) -> Result<(), StorageError> {
        debug_assert!(matches!(facet, "tags" | "acl" | "retention"));
        let conn = self.writer.lock();
        let updated = conn.execute(
            &format!("UPDATE objects SET {facet} = ?4 WHERE bucket = ?1 AND key = ?2 AND version_id = ?3"),
            params![bucket, key, version_id, value],
        )?;
        if updated == 0 {
            return Err(StorageError::ObjectNotFound(key.to_string()));
        }
        Ok(())
    }

    pub fn set_legal_hold(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
        on: bool,
    ) -> Result<(), StorageError> {
        let conn = self.writer.lock();
        let updated = conn.execute(
            "UPDATE objects SET legal_hold = ?4 WHERE bucket = ?1 AND key = ?2 AND version_id = ?3",
            params![bucket, key, version_id, on as i64],
        )?;
        if updated == 0 {
            return Err(StorageError::ObjectNotFound(key.to_string()));
        }
        Ok(())
    }

    // === Listing ===
    //
    // Both listing queries push WHERE and LIMIT into SQLite so a page costs
    // O(page), not O(bucket). Prefix matching uses a half-open key range
    // instead of LIKE, which sidesteps wildcard escaping entirely.

    /// One page of latest regular rows past `lower`, in key order. The
    /// bound is exclusive for plain cursors and inclusive when the caller
    /// is skipping past a rolled-up common prefix.
    pub fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        lower: &str,
        inclusive: bool,
        limit: usize,
    ) -> Result<Vec<ObjectSummary>, StorageError> {
        let upper = prefix_upper_bound(prefix);
        let cmp = if inclusive { ">=" } else { ">" };
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT key, version_id, is_latest, kind, size, etag, last_modified
                 FROM objects
                 WHERE bucket = ?1 AND is_latest = 1 AND kind = 'regular'
                   AND key {cmp} ?2 AND key >= ?3 AND (?4 IS NULL OR key < ?4)
                 ORDER BY key
                 LIMIT ?5"
            ))?;
            let rows = stmt.query_map(
                params![bucket, lower, prefix, upper, limit as i64],
                summary_from_row,
            )?;
            rows.collect()
        })
    }

    /// One page of all version rows (markers exclusive), ordered
    /// `(key ASC, last_modified DESC, version_id DESC)` so versions of a
    /// key are grouped newest-first with delete markers interleaved.
    pub fn list_versions_page(
        &self,
        bucket: &str,
        prefix: &str,
        key_marker: &str,
        key_marker_inclusive: bool,
        version_id_marker: &str,
        limit: usize,
    ) -> Result<Vec<ObjectSummary>, StorageError> {
        let upper = prefix_upper_bound(prefix);

        // The version marker positions within a key via the row's
        // last_modified; resolve it first. A vanished marker row degrades
        // to key-level pagination, which only re-reads one key's versions.
        let marker_modified: Option<String> = if version_id_marker.is_empty() {
            None
        } else {
            self.with_reader(|conn| {
                conn.query_row(
                    "SELECT last_modified FROM objects
                     WHERE bucket = ?1 AND key = ?2 AND version_id = ?3",
                    params![bucket, key_marker, version_id_marker],
                    |r| r.get(0),
                )
                .optional()
            })?
        };

        let cmp = if key_marker_inclusive && marker_modified.is_none() {
            ">="
        } else {
            ">"
        };
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT key, version_id, is_latest, kind, size, etag, last_modified
                 FROM objects
                 WHERE bucket = ?1 AND key >= ?2 AND (?3 IS NULL OR key < ?3)
                   AND (key {cmp} ?4
                        OR (key = ?4 AND ?5 IS NOT NULL
                            AND (last_modified < ?5
                                 OR (last_modified = ?5 AND version_id < ?6))))
                 ORDER BY key ASC, last_modified DESC, version_id DESC
                 LIMIT ?7"
            ))?;
            let rows = stmt.query_map(
                params![
                    bucket,
                    prefix,
                    upper,
                    key_marker,
                    marker_modified,
                    version_id_marker,
                    limit as i64
                ],
                summary_from_row,
            )?;
            rows.collect()
        })
    }

    // === Multipart uploads ===

    pub fn create_upload(&self, upload: &MultipartUpload) -> Result<(), StorageError> {
        let conn = self.writer.lock();
        conn.execute(
            "INSERT INTO multipart_uploads
               (upload_id, bucket, key, initiated_at, content_type, user_metadata, tags, acl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                upload.upload_id,
                upload.bucket,
                upload.key,
                upload.initiated_at.to_rfc3339(),
                upload.content_type,
                serde_json::to_string(&upload.user_metadata)?,
                upload.tags,
                upload.acl,
            ],
        )?;
        Ok(())
    }

    pub fn get_upload(&self, upload_id: &str) -> Result<Option<MultipartUpload>, StorageError> {
        self.with_reader(|conn| {
            conn.query_row(
                "SELECT upload_id, bucket, key, initiated_at, content_type, user_metadata, tags, acl
                 FROM multipart_uploads WHERE upload_id = ?1",
                params![upload_id],
                upload_from_row,
            )
            .optional()
        })
    }

    /// Insert or replace a part row. Returns the blob path of a replaced
    /// part so the caller can unlink it.
    pub fn put_part(
        &self,
        upload_id: &str,
        part: &MultipartPart,
    ) -> Result<Option<String>, StorageError> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction()?;
        let displaced: Option<String> = tx
            .query_row(
                "SELECT blob_path FROM multipart_parts WHERE upload_id = ?1 AND part_number = ?2",
                params![upload_id, part.part_number],
                |r| r.get(0),
            )
            .optional()?;
        tx.execute(
            "INSERT INTO multipart_parts (upload_id, part_number, etag, size, blob_path, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (upload_id, part_number) DO UPDATE SET
               etag = excluded.etag, size = excluded.size,
               blob_path = excluded.blob_path, uploaded_at = excluded.uploaded_at",
            params![
                upload_id,
                part.part_number,
                part.etag,
                part.size as i64,
                part.blob_path,
                part.uploaded_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(displaced)
    }

    /// Parts in part-number order, optionally after a marker, limited.
    pub fn list_parts(
        &self,
        upload_id: &str,
        part_number_marker: u32,
        limit: usize,
    ) -> Result<Vec<MultipartPart>, StorageError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT part_number, etag, size, blob_path, uploaded_at
                 FROM multipart_parts
                 WHERE upload_id = ?1 AND part_number > ?2
                 ORDER BY part_number
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                params![upload_id, part_number_marker, limit as i64],
                part_from_row,
            )?;
            rows.collect()
        })
    }

    /// All parts of an upload, for CompleteMultipartUpload validation.
    pub fn all_parts(&self, upload_id: &str) -> Result<Vec<MultipartPart>, StorageError> {
        self.list_parts(upload_id, 0, 10_001)
    }

    /// One page of uploads for a bucket+prefix, ordered `(key, upload_id)`,
    /// markers exclusive.
    pub fn list_uploads_page(
        &self,
        bucket: &str,
        prefix: &str,
        key_marker: &str,
        upload_id_marker: &str,
        limit: usize,
    ) -> Result<Vec<MultipartUpload>, StorageError> {
        let upper = prefix_upper_bound(prefix);
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT upload_id, bucket, key, initiated_at, content_type, user_metadata, tags, acl
                 FROM multipart_uploads
                 WHERE bucket = ?1 AND key >= ?2 AND (?3 IS NULL OR key < ?3)
                   AND (key > ?4 OR (key = ?4 AND upload_id > ?5))
                 ORDER BY key, upload_id
                 LIMIT ?6",
            )?;
            let rows = stmt.query_map(
                params![bucket, prefix, upper, key_marker, upload_id_marker, limit as i64],
                upload_from_row,
            )?;
            rows.collect()
        })
    }

    /// Atomically publish a completed multipart upload: insert the
    /// assembled object version, drop the upload and its part rows.
    /// Returns (displaced object blob, part blob paths) for post-commit
    /// unlinking.
    pub fn complete_upload(
        &self,
        upload_id: &str,
        row: &ObjectVersion,
    ) -> Result<(Option<String>, Vec<String>), StorageError> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction()?;

        let mut part_blobs = Vec::new();
        {
            let mut stmt = tx
                .prepare("SELECT blob_path FROM multipart_parts WHERE upload_id = ?1")?;
            let rows = stmt.query_map(params![upload_id], |r| r.get::<_, String>(0))?;
            for blob in rows {
                part_blobs.push(blob?);
            }
        }

        let removed = tx.execute(
            "DELETE FROM multipart_uploads WHERE upload_id = ?1",
            params![upload_id],
        )?;
        if removed == 0 {
            return Err(StorageError::UploadNotFound(upload_id.to_string()));
        }
        tx.execute(
            "DELETE FROM multipart_parts WHERE upload_id = ?1",
            params![upload_id],
        )?;

        let displaced = insert_version_tx(&tx, row)?;
        tx.commit()?;
        Ok((displaced, part_blobs))
    }

    /// Drop an upload and its parts; returns part blob paths for unlinking.
    pub fn abort_upload(&self, upload_id: &str) -> Result<Vec<String>, StorageError> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction()?;

        let mut part_blobs = Vec::new();
        {
            let mut stmt = tx
                .prepare("SELECT blob_path FROM multipart_parts WHERE upload_id = ?1")?;
            let rows = stmt.query_map(params![upload_id], |r| r.get::<_, String>(0))?;
            for blob in rows {
                part_blobs.push(blob?);
            }
        }

        let removed = tx.execute(
            "DELETE FROM multipart_uploads WHERE upload_id = ?1",
            params![upload_id],
        )?;
        if removed == 0 {
            return Err(StorageError::UploadNotFound(upload_id.to_string()));
        }
        tx.execute(
            "DELETE FROM multipart_parts WHERE upload_id = ?1",
            params![upload_id],
        )?;

        tx.commit()?;
        Ok(part_blobs)
    }

    /// Every known upload id, for the startup scavenger.
    pub fn all_upload_ids(&self) -> Result<Vec<String>, StorageError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare("SELECT upload_id FROM multipart_uploads")?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            rows.collect()
        })
    }
}

fn apply_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Insert a version row inside `tx`, clearing any prior latest for the key
/// and displacing a prior row with the same version id (the `null` upsert
/// path). Returns the displaced row's blob path, if any.
fn insert_version_tx(tx: &Transaction<'_>, row: &ObjectVersion) -> Result<Option<String>, StorageError> {
    let displaced: Option<String> = tx
        .query_row(
            "SELECT blob_path FROM objects
             WHERE bucket = ?1 AND key = ?2 AND version_id = ?3",
            params![row.bucket, row.key, row.version_id],
            |r| r.get(0),
        )
        .optional()?;

    tx.execute(
        "UPDATE objects SET is_latest = 0 WHERE bucket = ?1 AND key = ?2 AND is_latest = 1",
        params![row.bucket, row.key],
    )?;

    tx.execute(
        "INSERT INTO objects
           (bucket, key, version_id, is_latest, kind, size, etag, content_type,
            user_metadata, system_metadata, tags, acl, retention, legal_hold,
            blob_path, last_modified)
         VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT (bucket, key, version_id) DO UPDATE SET
           is_latest = 1, kind = excluded.kind, size = excluded.size,
           etag = excluded.etag, content_type = excluded.content_type,
           user_metadata = excluded.user_metadata,
           system_metadata = excluded.system_metadata,
           tags = excluded.tags, acl = excluded.acl,
           retention = excluded.retention, legal_hold = excluded.legal_hold,
           blob_path = excluded.blob_path, last_modified = excluded.last_modified",
        params![
            row.bucket,
            row.key,
            row.version_id,
            row.kind.as_str(),
            row.size as i64,
            row.etag,
            row.content_type,
            serde_json::to_string(&row.user_metadata)?,
            serde_json::to_string(&row.system_metadata)?,
            row.tags,
            row.acl,
            row.retention,
            row.legal_hold as i64,
            row.blob_path,
            row.last_modified.to_rfc3339(),
        ],
    )?;

    Ok(displaced)
}

/// Smallest string greater than every key carrying `prefix`, or None when
/// the prefix is empty (no upper bound). Key comparisons in SQLite's
/// default BINARY collation are byte-wise, so bumping the final character
/// is exact for single-byte tails and conservative otherwise.
pub fn prefix_upper_bound(prefix: &str) -> Option<String> {
    if prefix.is_empty() {
        return None;
    }
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(&last) = chars.last() {
        if let Some(bumped) = char::from_u32(last as u32 + 1) {
            *chars.last_mut().unwrap() = bumped;
            return Some(chars.into_iter().collect());
        }
        chars.pop();
    }
    None
}

const OBJECT_COLS: &str = "bucket, key, version_id, is_latest, kind, size, etag, content_type, \
                           user_metadata, system_metadata, tags, acl, retention, legal_hold, \
                           blob_path, last_modified";

fn parse_time(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

fn bucket_from_row(row: &Row<'_>) -> Result<BucketRecord, rusqlite::Error> {
    Ok(BucketRecord {
        name: row.get(0)?,
        created_at: parse_time(row.get(1)?),
        versioning: VersioningState::parse(&row.get::<_, String>(2)?),
    })
}

fn object_from_row(row: &Row<'_>) -> Result<ObjectVersion, rusqlite::Error> {
    let user_metadata: HashMap<String, String> =
        serde_json::from_str(&row.get::<_, String>(8)?).unwrap_or_default();
    let system_metadata: SystemMetadata =
        serde_json::from_str(&row.get::<_, String>(9)?).unwrap_or_default();
    Ok(ObjectVersion {
        bucket: row.get(0)?,
        key: row.get(1)?,
        version_id: row.get(2)?,
        is_latest: row.get::<_, i64>(3)? != 0,
        kind: ObjectKind::parse(&row.get::<_, String>(4)?),
        size: row.get::<_, i64>(5)? as u64,
        etag: row.get(6)?,
        content_type: row.get(7)?,
        user_metadata,
        system_metadata,
        tags: row.get(10)?,
        acl: row.get(11)?,
        retention: row.get(12)?,
        legal_hold: row.get::<_, i64>(13)? != 0,
        blob_path: row.get(14)?,
        last_modified: parse_time(row.get(15)?),
    })
}

fn summary_from_row(row: &Row<'_>) -> Result<ObjectSummary, rusqlite::Error> {
    Ok(ObjectSummary {
        key: row.get(0)?,
        version_id: row.get(1)?,
        is_latest: row.get::<_, i64>(2)? != 0,
        kind: ObjectKind::parse(&row.get::<_, String>(3)?),
        size: row.get::<_, i64>(4)? as u64,
        etag: row.get(5)?,
        last_modified: parse_time(row.get(6)?),
    })
}

fn upload_from_row(row: &Row<'_>) -> Result<MultipartUpload, rusqlite::Error> {
    let user_metadata: HashMap<String, String> =
        serde_json::from_str(&row.get::<_, String>(5)?).unwrap_or_default();
    Ok(MultipartUpload {
        upload_id: row.get(0)?,
        bucket: row.get(1)?,
        key: row.get(2)?,
        initiated_at: parse_time(row.get(3)?),
        content_type: row.get(4)?,
        user_metadata,
        tags: row.get(6)?,
        acl: row.get(7)?,
    })
}

fn part_from_row(row: &Row<'_>) -> Result<MultipartPart, rusqlite::Error> {
    Ok(MultipartPart {
        part_number: row.get::<_, i64>(0)? as u32,
        etag: row.get(1)?,
        size: row.get::<_, i64>(2)? as u64,
        blob_path: row.get(3)?,
        uploaded_at: parse_time(row.get(4)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{mint_version_id, PutMetadata, NULL_VERSION_ID};
    use tempfile::TempDir;

    fn open_store() -> (TempDir, MetaStore) {
        let dir = TempDir::new().unwrap();
        let store = MetaStore::open(&dir.path().join("metadata.sqlite3")).unwrap();
        (dir, store)
    }

    fn version_row(bucket: &str, key: &str, version_id: &str) -> ObjectVersion {
        let meta = PutMetadata::default();
        ObjectVersion {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id: version_id.to_string(),
            is_latest: true,
            kind: ObjectKind::Regular,
            size: 3,
            etag: "900150983cd24fb0d6963f7d28e17f72".to_string(),
            content_type: meta.content_type,
            user_metadata: meta.user_metadata,
            system_metadata: meta.system_metadata,
            tags: None,
            acl: None,
            retention: None,
            legal_hold: false,
            blob_path: Some(format!("buckets/{bucket}/objects/ab/{version_id}")),
            last_modified: Utc::now(),
        }
    }

    #[test]
    fn test_bucket_lifecycle() {
        let (_dir, store) = open_store();
        store.create_bucket("b1", Utc::now()).unwrap();
        assert!(matches!(
            store.create_bucket("b1", Utc::now()),
            Err(StorageError::BucketAlreadyExists(_))
        ));
        assert!(store.get_bucket("b1").unwrap().is_some());
        assert_eq!(store.list_buckets().unwrap().len(), 1);
        store.delete_bucket("b1").unwrap();
        assert!(store.get_bucket("b1").unwrap().is_none());
        assert!(matches!(
            store.delete_bucket("b1"),
            Err(StorageError::BucketNotFound(_))
        ));
    }

    #[test]
    fn test_delete_bucket_refuses_nonempty() {
        let (_dir, store) = open_store();
        store.create_bucket("b1", Utc::now()).unwrap();
        store
            .put_object_version(&version_row("b1", "k", NULL_VERSION_ID))
            .unwrap();
        assert!(matches!(
            store.delete_bucket("b1"),
            Err(StorageError::BucketNotEmpty(_))
        ));
    }

    #[test]
    fn test_null_version_upsert_displaces_blob() {
        let (_dir, store) = open_store();
        store.create_bucket("b1", Utc::now()).unwrap();

        let first = version_row("b1", "k", NULL_VERSION_ID);
        assert_eq!(store.put_object_version(&first).unwrap(), None);

        let mut second = version_row("b1", "k", NULL_VERSION_ID);
        second.blob_path = Some("buckets/b1/objects/cd/other".to_string());
        let displaced = store.put_object_version(&second).unwrap();
        assert_eq!(displaced, first.blob_path);

        let latest = store.get_latest("b1", "k").unwrap().unwrap();
        assert_eq!(latest.blob_path, second.blob_path);
    }

    #[test]
    fn test_versioned_inserts_keep_single_latest() {
        let (_dir, store) = open_store();
        store.create_bucket("b1", Utc::now()).unwrap();

        let v1 = version_row("b1", "k", &mint_version_id());
        let v2 = version_row("b1", "k", &mint_version_id());
        store.put_object_version(&v1).unwrap();
        store.put_object_version(&v2).unwrap();

        let latest = store.get_latest("b1", "k").unwrap().unwrap();
        assert_eq!(latest.version_id, v2.version_id);

        let older = store.get_version("b1", "k", &v1.version_id).unwrap().unwrap();
        assert!(!older.is_latest);
    }

    #[test]
    fn test_delete_version_promotes_previous() {
        let (_dir, store) = open_store();
        store.create_bucket("b1", Utc::now()).unwrap();

        let mut v1 = version_row("b1", "k", &mint_version_id());
        v1.last_modified = Utc::now() - chrono::Duration::seconds(5);
        let v2 = version_row("b1", "k", &mint_version_id());
        store.put_object_version(&v1).unwrap();
        store.put_object_version(&v2).unwrap();

        let removed = store
            .delete_version("b1", "k", &v2.version_id)
            .unwrap()
            .unwrap();
        assert_eq!(removed.version_id, v2.version_id);

        let latest = store.get_latest("b1", "k").unwrap().unwrap();
        assert_eq!(latest.version_id, v1.version_id);
        assert!(store
            .delete_version("b1", "k", "missing")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_list_objects_page_prefix_and_cursor() {
        let (_dir, store) = open_store();
        store.create_bucket("b1", Utc::now()).unwrap();
        for key in ["a/1", "a/2", "b/1", "c"] {
            store
                .put_object_version(&version_row("b1", key, NULL_VERSION_ID))
                .unwrap();
        }

        let page = store.list_objects_page("b1", "a/", "", false, 10).unwrap();
        assert_eq!(
            page.iter().map(|o| o.key.as_str()).collect::<Vec<_>>(),
            vec!["a/1", "a/2"]
        );

        let page = store.list_objects_page("b1", "", "a/2", false, 10).unwrap();
        assert_eq!(
            page.iter().map(|o| o.key.as_str()).collect::<Vec<_>>(),
            vec!["b/1", "c"]
        );

        let page = store.list_objects_page("b1", "", "", false, 2).unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_list_versions_groups_newest_first() {
        let (_dir, store) = open_store();
        store.create_bucket("b1", Utc::now()).unwrap();

        let mut v1 = version_row("b1", "k", "v-a");
        v1.last_modified = Utc::now() - chrono::Duration::seconds(10);
        let v2 = version_row("b1", "k", "v-b");
        store.put_object_version(&v1).unwrap();
        store.put_object_version(&v2).unwrap();

        let page = store.list_versions_page("b1", "", "", false, "", 10).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].version_id, "v-b");
        assert!(page[0].is_latest);
        assert_eq!(page[1].version_id, "v-a");

        // Marker pagination resumes after the first row.
        let rest = store
            .list_versions_page("b1", "", "k", false, "v-b", 10)
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].version_id, "v-a");
    }

    #[test]
    fn test_multipart_rows_roundtrip() {
        let (_dir, store) = open_store();
        store.create_bucket("b1", Utc::now()).unwrap();

        let upload = MultipartUpload {
            upload_id: "u1".to_string(),
            bucket: "b1".to_string(),
            key: "big.bin".to_string(),
            initiated_at: Utc::now(),
            content_type: None,
            user_metadata: HashMap::new(),
            tags: None,
            acl: None,
        };
        store.create_upload(&upload).unwrap();
        assert!(store.get_upload("u1").unwrap().is_some());

        let part = MultipartPart {
            part_number: 1,
            etag: "aaaa".to_string(),
            size: 5,
            blob_path: "buckets/b1/uploads/u1/1".to_string(),
            uploaded_at: Utc::now(),
        };
        assert_eq!(store.put_part("u1", &part).unwrap(), None);

        let mut replaced = part.clone();
        replaced.blob_path = "buckets/b1/uploads/u1/1.new".to_string();
        assert_eq!(
            store.put_part("u1", &replaced).unwrap(),
            Some(part.blob_path.clone())
        );

        let parts = store.list_parts("u1", 0, 100).unwrap();
        assert_eq!(parts.len(), 1);

        let blobs = store.abort_upload("u1").unwrap();
        assert_eq!(blobs, vec![replaced.blob_path]);
        assert!(store.get_upload("u1").unwrap().is_none());
        assert!(matches!(
            store.abort_upload("u1"),
            Err(StorageError::UploadNotFound(_))
        ));
    }

    #[test]
    fn test_complete_upload_publishes_and_cleans() {
        let (_dir, store) = open_store();
        store.create_bucket("b1", Utc::now()).unwrap();

        let upload = MultipartUpload {
            upload_id: "u1".to_string(),
            bucket: "b1".to_string(),
            key: "big.bin".to_string(),
            initiated_at: Utc::now(),
            content_type: None,
            user_metadata: HashMap::new(),
            tags: None,
            acl: None,
        };
        store.create_upload(&upload).unwrap();
        for n in 1..=2u32 {
            store
                .put_part(
                    "u1",
                    &MultipartPart {
                        part_number: n,
                        etag: format!("etag{n}"),
                        size: 5,
                        blob_path: format!("buckets/b1/uploads/u1/{n}"),
                        uploaded_at: Utc::now(),
                    },
                )
                .unwrap();
        }

        let row = version_row("b1", "big.bin", NULL_VERSION_ID);
        let (displaced, part_blobs) = store.complete_upload("u1", &row).unwrap();
        assert_eq!(displaced, None);
        assert_eq!(part_blobs.len(), 2);
        assert!(store.get_upload("u1").unwrap().is_none());
        assert!(store.get_latest("b1", "big.bin").unwrap().is_some());
    }

    #[test]
    fn test_bucket_config_blob_roundtrip() {
        let (_dir, store) = open_store();
        store.create_bucket("b1", Utc::now()).unwrap();
        assert!(store.get_bucket_config("b1", "tagging").unwrap().is_none());
        store
            .put_bucket_config("b1", "tagging", b"<Tagging/>")
            .unwrap();
        assert_eq!(
            store.get_bucket_config("b1", "tagging").unwrap().unwrap(),
            b"<Tagging/>"
        );
        store.delete_bucket_config("b1", "tagging").unwrap();
        assert!(store.get_bucket_config("b1", "tagging").unwrap().is_none());
    }

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound(""), None);
        assert_eq!(prefix_upper_bound("a"), Some("b".to_string()));
        assert_eq!(prefix_upper_bound("photos/"), Some("photos0".to_string()));
    }
}
