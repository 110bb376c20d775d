//! Storage-layer error taxonomy
//!
//! These are the errors the engine and the stores speak internally; the
//! handler layer maps them onto S3 wire codes. Anything that reaches the
//! wire unmapped becomes InternalError there.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Bucket already exists: {0}")]
    BucketAlreadyExists(String),

    #[error("Bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// The latest (or addressed) version is a delete marker; the wire
    /// layer turns this into 404 + `x-amz-delete-marker: true`.
    #[error("Object is a delete marker")]
    DeleteMarkerFound { version_id: String },

    #[error("Upload not found: {0}")]
    UploadNotFound(String),

    #[error("Invalid part: {0}")]
    InvalidPart(String),

    #[error("Parts are not in ascending order")]
    InvalidPartOrder,

    #[error("Part is smaller than the multipart minimum")]
    EntityTooSmall,

    /// Unsatisfiable byte range; carries the object length for the
    /// `Content-Range: bytes */{len}` response header.
    #[error("Requested range not satisfiable")]
    InvalidRange { length: u64 },

    /// The streamed payload's SHA-256 did not match the signed
    /// `x-amz-content-sha256`; an authentication failure, not a client
    /// transfer error.
    #[error("Payload SHA-256 does not match the signed content hash")]
    PayloadHashMismatch,

    /// The streamed payload did not match the `Content-MD5` header.
    #[error("Payload MD5 does not match the Content-MD5 header")]
    DigestMismatch,

    /// The body ended before `Content-Length` bytes arrived.
    #[error("Body shorter than declared Content-Length")]
    IncompleteBody,

    #[error("Disk full: insufficient storage space")]
    DiskFull,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error surfaced while reading the request body stream; the wire
    /// layer inspects the source for chunk-signature failures.
    #[error("Body read error: {0}")]
    BodyRead(std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metadata store error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Other(String),
}
