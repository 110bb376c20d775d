//! Core types for karst S3-compatible object storage

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Sentinel version id used for writes to buckets that are unversioned or
/// suspended. S3 reports it as the literal string "null".
pub const NULL_VERSION_ID: &str = "null";

/// Storage class reported for every object. This server has exactly one.
pub const STORAGE_CLASS: &str = "STANDARD";

/// Canned ACL values S3 accepts on `x-amz-acl`.
pub const CANNED_ACLS: &[&str] = &[
    "private",
    "public-read",
    "public-read-write",
    "authenticated-read",
    "bucket-owner-read",
    "bucket-owner-full-control",
];

/// Errors that can occur when validating user-provided bucket/key inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameValidationError(pub String);

impl fmt::Display for NameValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for NameValidationError {}

/// Validate an S3 bucket name: 3-63 chars, lowercase letters, digits,
/// hyphens and dots; must start and end with a letter or digit; no
/// adjacent dots; must not look like an IPv4 address.
pub fn validate_bucket_name(name: &str) -> Result<(), NameValidationError> {
    if name.len() < 3 || name.len() > 63 {
        return Err(NameValidationError(
            "Bucket name must be between 3 and 63 characters".to_string(),
        ));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
    {
        return Err(NameValidationError(
            "Bucket name may only contain lowercase letters, digits, hyphens and dots".to_string(),
        ));
    }
    let first = name.as_bytes()[0];
    let last = name.as_bytes()[name.len() - 1];
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err(NameValidationError(
            "Bucket name must start and end with a letter or digit".to_string(),
        ));
    }
    if name.contains("..") || name.contains(".-") || name.contains("-.") {
        return Err(NameValidationError(
            "Bucket name must not contain adjacent punctuation".to_string(),
        ));
    }
    // 192.168.0.1 style names are reserved
    if name.split('.').count() == 4 && name.split('.').all(|p| p.parse::<u8>().is_ok()) {
        return Err(NameValidationError(
            "Bucket name must not be formatted as an IP address".to_string(),
        ));
    }
    Ok(())
}

/// Validate an object key for PUT/GET/HEAD/DELETE.
///
/// Keys are almost free-form in S3; the checks here reject the inputs that
/// would be hazardous for a filesystem-backed blob store.
pub fn validate_object_key(key: &str) -> Result<(), NameValidationError> {
    if key.is_empty() {
        return Err(NameValidationError(
            "Object key must not be empty".to_string(),
        ));
    }
    if key.len() > 1024 {
        return Err(NameValidationError(
            "Object key must not exceed 1024 bytes".to_string(),
        ));
    }
    validate_key_path(key)
}

/// Validate a list/query prefix for traversal and encoding hazards.
pub fn validate_prefix(prefix: &str) -> Result<(), NameValidationError> {
    if prefix.is_empty() {
        return Ok(());
    }
    validate_key_path(prefix)
}

fn validate_key_path(value: &str) -> Result<(), NameValidationError> {
    if value.contains('\0') {
        return Err(NameValidationError(
            "Key must not contain NUL bytes".to_string(),
        ));
    }
    for segment in value.split('/') {
        if segment == ".." {
            return Err(NameValidationError(
                "Key must not contain '..' path segments".to_string(),
            ));
        }
    }
    Ok(())
}

/// Check a canned ACL value against the fixed S3 set.
pub fn validate_canned_acl(acl: &str) -> Result<(), NameValidationError> {
    if CANNED_ACLS.contains(&acl) {
        Ok(())
    } else {
        Err(NameValidationError(format!("Unknown canned ACL: {acl}")))
    }
}

/// Bucket versioning state. Only this facet of bucket configuration is
/// parsed, because it changes write behavior; everything else is stored as
/// an opaque blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VersioningState {
    #[default]
    Unversioned,
    Enabled,
    Suspended,
}

impl VersioningState {
    /// Parse the stored column value.
    pub fn parse(s: &str) -> Self {
        match s {
            "enabled" => VersioningState::Enabled,
            "suspended" => VersioningState::Suspended,
            _ => VersioningState::Unversioned,
        }
    }

    /// Column value for the metadata store.
    pub fn as_str(self) -> &'static str {
        match self {
            VersioningState::Unversioned => "unversioned",
            VersioningState::Enabled => "enabled",
            VersioningState::Suspended => "suspended",
        }
    }

    /// The `<Status>` element value, absent while unversioned.
    pub fn status_element(self) -> Option<&'static str> {
        match self {
            VersioningState::Unversioned => None,
            VersioningState::Enabled => Some("Enabled"),
            VersioningState::Suspended => Some("Suspended"),
        }
    }
}

/// Whether a version row carries object bytes or marks a deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Regular,
    DeleteMarker,
}

impl ObjectKind {
    pub fn parse(s: &str) -> Self {
        if s == "delete-marker" {
            ObjectKind::DeleteMarker
        } else {
            ObjectKind::Regular
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Regular => "regular",
            ObjectKind::DeleteMarker => "delete-marker",
        }
    }
}

/// System-defined response headers stored per version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
}

impl SystemMetadata {
    pub fn is_empty(&self) -> bool {
        self.cache_control.is_none()
            && self.content_disposition.is_none()
            && self.content_encoding.is_none()
            && self.content_language.is_none()
            && self.expires.is_none()
    }
}

/// One object version row as the engine sees it.
#[derive(Debug, Clone)]
pub struct ObjectVersion {
    pub bucket: String,
    pub key: String,
    pub version_id: String,
    pub is_latest: bool,
    pub kind: ObjectKind,
    pub size: u64,
    /// Unquoted ETag value (MD5 hex, or `hex-N` for multipart completions).
    pub etag: String,
    pub content_type: Option<String>,
    pub user_metadata: HashMap<String, String>,
    pub system_metadata: SystemMetadata,
    pub tags: Option<String>,
    pub acl: Option<String>,
    pub retention: Option<String>,
    pub legal_hold: bool,
    pub blob_path: Option<String>,
    pub last_modified: DateTime<Utc>,
}

impl ObjectVersion {
    /// ETag in wire form (quoted).
    pub fn quoted_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }

    pub fn is_delete_marker(&self) -> bool {
        self.kind == ObjectKind::DeleteMarker
    }
}

/// New-object attributes collected from request headers before a write.
#[derive(Debug, Clone, Default)]
pub struct PutMetadata {
    pub content_type: Option<String>,
    pub user_metadata: HashMap<String, String>,
    pub system_metadata: SystemMetadata,
    pub tags: Option<String>,
    pub acl: Option<String>,
}

/// Summary row returned by listings; listing queries never pull user
/// metadata so pages stay cheap.
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub version_id: String,
    pub is_latest: bool,
    pub kind: ObjectKind,
    pub size: u64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

/// In-progress multipart upload row.
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub initiated_at: DateTime<Utc>,
    pub content_type: Option<String>,
    pub user_metadata: HashMap<String, String>,
    pub tags: Option<String>,
    pub acl: Option<String>,
}

/// One staged part of a multipart upload.
#[derive(Debug, Clone)]
pub struct MultipartPart {
    pub part_number: u32,
    /// Unquoted MD5 hex of the part bytes.
    pub etag: String,
    pub size: u64,
    pub blob_path: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Mint an opaque URL-safe version id.
///
/// The nanosecond prefix makes ids sort by creation time, which keeps the
/// version listing index effective; the random suffix keeps ids unique
/// within a key even under clock ties. Clients must treat the whole token
/// as opaque.
pub fn mint_version_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
    let suffix: u32 = rand::thread_rng().gen();
    format!("{nanos:016x}{suffix:08x}")
}

/// Mint a random 32-hex-char blob id.
pub fn mint_blob_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_bucket_names() {
        let long = "x".repeat(63);
        for name in ["abc", "my-bucket", "my.bucket.2024", "a1b", long.as_str()] {
            assert!(validate_bucket_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_bucket_names() {
        let too_long = "x".repeat(64);
        for name in [
            "ab",
            "UPPER",
            "-leading",
            "trailing-",
            "two..dots",
            "under_score",
            "192.168.0.1",
            too_long.as_str(),
        ] {
            assert!(
                validate_bucket_name(name).is_err(),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_rejects_path_traversal() {
        assert!(validate_object_key("../../../etc/passwd").is_err());
        assert!(validate_object_key("a/../b").is_err());
        assert!(validate_prefix("../bad").is_err());
    }

    #[test]
    fn test_validate_rejects_nul_byte() {
        assert!(validate_object_key("path\0file").is_err());
    }

    #[test]
    fn test_validate_allows_normal_keys() {
        assert!(validate_object_key("releases/v1.0/app.zip").is_ok());
        assert!(validate_object_key("file with spaces.txt").is_ok());
        assert!(validate_prefix("releases/v1.0/").is_ok());
        assert!(validate_prefix("").is_ok());
    }

    #[test]
    fn test_canned_acl_set() {
        assert!(validate_canned_acl("private").is_ok());
        assert!(validate_canned_acl("bucket-owner-full-control").is_ok());
        assert!(validate_canned_acl("everyone").is_err());
    }

    #[test]
    fn test_versioning_state_roundtrip() {
        for state in [
            VersioningState::Unversioned,
            VersioningState::Enabled,
            VersioningState::Suspended,
        ] {
            assert_eq!(VersioningState::parse(state.as_str()), state);
        }
        assert_eq!(
            VersioningState::parse("garbage"),
            VersioningState::Unversioned
        );
    }

    #[test]
    fn test_version_ids_sort_by_creation() {
        let a = mint_version_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = mint_version_id();
        assert!(a < b);
        assert_eq!(a.len(), 24);
    }

    #[test]
    fn test_blob_ids_unique() {
        assert_ne!(mint_blob_id(), mint_blob_id());
    }

    proptest::proptest! {
        #[test]
        fn prop_bucket_validation_never_panics(name in "\\PC{0,80}") {
            let _ = validate_bucket_name(&name);
        }

        #[test]
        fn prop_accepted_names_are_lowercase_ascii(name in "[a-z0-9.-]{3,63}") {
            if validate_bucket_name(&name).is_ok() {
                proptest::prop_assert!(name.bytes().all(|b| b != b'_'));
                proptest::prop_assert!(!name.contains(".."));
            }
        }
    }
}
