//! Listing: ListObjects (v1/v2), ListObjectVersions, delimiter roll-up
//!
//! The metadata store serves pages in key order with WHERE and LIMIT
//! pushed down; this module walks those pages, rolls keys up into common
//! prefixes, and skips the scan cursor past each rolled-up group so a page
//! costs O(result), not O(bucket).

use super::{StorageEngine, StorageError};
use crate::meta::prefix_upper_bound;
use crate::types::{ObjectKind, ObjectSummary};
use tracing::instrument;

/// One emitted listing entry, in lexicographic walk order.
#[derive(Debug, Clone)]
pub enum ListEntry {
    Object(ObjectSummary),
    CommonPrefix(String),
}

impl ListEntry {
    /// The name the entry sorts (and paginates) by.
    pub fn name(&self) -> &str {
        match self {
            ListEntry::Object(o) => &o.key,
            ListEntry::CommonPrefix(p) => p,
        }
    }
}

#[derive(Debug, Default)]
pub struct ListObjectsResult {
    pub entries: Vec<ListEntry>,
    pub is_truncated: bool,
    /// Name of the last emitted entry; becomes the continuation token /
    /// next marker when truncated.
    pub next_cursor: Option<String>,
}

#[derive(Debug, Default)]
pub struct ListVersionsResult {
    pub entries: Vec<ListEntry>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_version_id_marker: Option<String>,
}

/// Page size requested from the store per round trip.
const SCAN_BATCH: usize = 1000;

impl StorageEngine {
    /// Shared walk for ListObjects v1 and v2. `start_after` is the decoded
    /// continuation token, the v1 marker, or the StartAfter parameter;
    /// they all mean "strictly after this name".
    #[instrument(skip(self))]
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        start_after: &str,
        max_keys: usize,
    ) -> Result<ListObjectsResult, StorageError> {
        self.bucket(bucket).await?;

        let mut result = ListObjectsResult::default();
        if max_keys == 0 {
            return Ok(result);
        }

        let mut cursor = start_after.to_string();
        let mut inclusive = false;

        'scan: loop {
            let batch = (max_keys - result.entries.len() + 1).min(SCAN_BATCH);
            let page = {
                let (b, p, c) = (bucket.to_string(), prefix.to_string(), cursor.clone());
                self.with_meta(move |m| m.list_objects_page(&b, &p, &c, inclusive, batch))
                    .await?
            };
            let exhausted = page.len() < batch;

            for row in page {
                let group = delimiter.and_then(|d| common_prefix_of(prefix, &row.key, d));
                match group {
                    Some(cp) => {
                        // Resuming just after an emitted common prefix:
                        // swallow the group without re-emitting it.
                        if cp == start_after {
                            cursor = prefix_upper_bound(&cp).unwrap_or(cp);
                            inclusive = true;
                            continue 'scan;
                        }
                        if result.entries.len() == max_keys {
                            result.is_truncated = true;
                            break 'scan;
                        }
                        cursor = prefix_upper_bound(&cp).unwrap_or_else(|| cp.clone());
                        inclusive = true;
                        result.entries.push(ListEntry::CommonPrefix(cp));
                        continue 'scan;
                    }
                    None => {
                        if result.entries.len() == max_keys {
                            result.is_truncated = true;
                            break 'scan;
                        }
                        cursor = row.key.clone();
                        inclusive = false;
                        result.entries.push(ListEntry::Object(row));
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        if result.is_truncated {
            result.next_cursor = result.entries.last().map(|e| e.name().to_string());
        }
        Ok(result)
    }

    /// ListObjectVersions: every version row, keys ascending, versions of
    /// a key newest-first, delete markers interleaved in position.
    #[instrument(skip(self))]
    pub async fn list_versions(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        key_marker: &str,
        version_id_marker: &str,
        max_keys: usize,
    ) -> Result<ListVersionsResult, StorageError> {
        self.bucket(bucket).await?;

        let mut result = ListVersionsResult::default();
        if max_keys == 0 {
            return Ok(result);
        }

        let mut cursor_key = key_marker.to_string();
        let mut cursor_version = version_id_marker.to_string();
        let mut inclusive = false;

        'scan: loop {
            let batch = (max_keys - result.entries.len() + 1).min(SCAN_BATCH);
            let page = {
                let (b, p, ck, cv) = (
                    bucket.to_string(),
                    prefix.to_string(),
                    cursor_key.clone(),
                    cursor_version.clone(),
                );
                self.with_meta(move |m| m.list_versions_page(&b, &p, &ck, inclusive, &cv, batch))
                    .await?
            };
            let exhausted = page.len() < batch;

            for row in page {
                let group = delimiter.and_then(|d| common_prefix_of(prefix, &row.key, d));
                match group {
                    Some(cp) => {
                        if cp == key_marker {
                            cursor_key = prefix_upper_bound(&cp).unwrap_or(cp);
                            cursor_version.clear();
                            inclusive = true;
                            continue 'scan;
                        }
                        if result.entries.len() == max_keys {
                            result.is_truncated = true;
                            break 'scan;
                        }
                        cursor_key = prefix_upper_bound(&cp).unwrap_or_else(|| cp.clone());
                        cursor_version.clear();
                        inclusive = true;
                        result.entries.push(ListEntry::CommonPrefix(cp));
                        continue 'scan;
                    }
                    None => {
                        if result.entries.len() == max_keys {
                            result.is_truncated = true;
                            break 'scan;
                        }
                        cursor_key = row.key.clone();
                        cursor_version = row.version_id.clone();
                        inclusive = false;
                        result.entries.push(ListEntry::Object(row));
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        if result.is_truncated {
            match result.entries.last() {
                Some(ListEntry::Object(o)) => {
                    result.next_key_marker = Some(o.key.clone());
                    result.next_version_id_marker = Some(o.version_id.clone());
                }
                Some(ListEntry::CommonPrefix(p)) => {
                    result.next_key_marker = Some(p.clone());
                }
                None => {}
            }
        }
        Ok(result)
    }
}

/// If `key` contains `delimiter` after `prefix`, the common prefix it
/// rolls up into; otherwise None.
fn common_prefix_of(prefix: &str, key: &str, delimiter: &str) -> Option<String> {
    if delimiter.is_empty() {
        return None;
    }
    let rest = key.strip_prefix(prefix)?;
    let pos = rest.find(delimiter)?;
    Some(format!("{prefix}{}{delimiter}", &rest[..pos]))
}

/// Split listing entries into objects and common prefixes, preserving
/// order within each class (the response XML groups them separately).
pub fn partition_entries(entries: Vec<ListEntry>) -> (Vec<ObjectSummary>, Vec<String>) {
    let mut objects = Vec::new();
    let mut prefixes = Vec::new();
    for entry in entries {
        match entry {
            ListEntry::Object(o) => objects.push(o),
            ListEntry::CommonPrefix(p) => prefixes.push(p),
        }
    }
    (objects, prefixes)
}

/// Like `partition_entries`, but objects split into versions and delete
/// markers for ListVersionsResult.
pub fn partition_version_entries(
    entries: Vec<ListEntry>,
) -> (Vec<ObjectSummary>, Vec<ObjectSummary>, Vec<String>) {
    let mut versions = Vec::new();
    let mut markers = Vec::new();
    let mut prefixes = Vec::new();
    for entry in entries {
        match entry {
            ListEntry::Object(o) if o.kind == ObjectKind::DeleteMarker => markers.push(o),
            ListEntry::Object(o) => versions.push(o),
            ListEntry::CommonPrefix(p) => prefixes.push(p),
        }
    }
    (versions, markers, prefixes)
}
