//! S3 error taxonomy and XML error responses
//!
//! Storage-layer errors map onto fixed S3 codes here; anything
//! unrecognized is logged and becomes InternalError so internal detail
//! never reaches a client. Every error response carries a fresh random
//! request id, mirrored in the `x-amz-request-id` header.

use crate::engine::StorageError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

/// S3 API errors
#[derive(Debug, Clone, Error)]
pub enum S3Error {
    // Request shape
    #[error("InvalidRequest: {0}")]
    InvalidRequest(String),

    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("MalformedXML: The XML you provided was not well-formed.")]
    MalformedXML,

    #[error("MissingContentLength: You must provide the Content-Length HTTP header.")]
    MissingContentLength,

    #[error("InvalidRange: The requested range is not satisfiable.")]
    InvalidRange { length: u64 },

    #[error("MethodNotAllowed: The specified method is not allowed against this resource.")]
    MethodNotAllowed,

    #[error("IncompleteBody: You did not provide the number of bytes specified by the Content-Length HTTP header.")]
    IncompleteBody,

    #[error("BadDigest: The digest you specified did not match what we received.")]
    BadDigest,

    // Resource presence
    #[error("NoSuchBucket: The specified bucket does not exist.")]
    NoSuchBucket(String),

    #[error("NoSuchKey: The specified key does not exist.")]
    NoSuchKey {
        key: String,
        /// Version id of the delete marker that answered the lookup, if
        /// one did; emitted as `x-amz-delete-marker` + `x-amz-version-id`.
        delete_marker: Option<String>,
    },

    #[error("NoSuchUpload: The specified upload does not exist.")]
    NoSuchUpload(String),

    #[error("NoSuchTagSet: The TagSet does not exist.")]
    NoSuchTagSet,

    #[error("NoSuchCORSConfiguration: The CORS configuration does not exist.")]
    NoSuchCORSConfiguration,

    /// Missing pass-through facet with its own AWS error code
    /// (NoSuchBucketPolicy, NoSuchLifecycleConfiguration, ...).
    #[error("{code}: The specified configuration does not exist.")]
    ConfigurationNotFound { code: &'static str },

    // Resource state
    #[error("BucketAlreadyExists: The requested bucket name is not available.")]
    BucketAlreadyExists(String),

    #[error("BucketAlreadyOwnedByYou: Your previous request to create the named bucket succeeded and you already own it.")]
    BucketAlreadyOwnedByYou(String),

    #[error("BucketNotEmpty: The bucket you tried to delete is not empty.")]
    BucketNotEmpty(String),

    // Naming
    #[error("InvalidBucketName: The specified bucket is not valid.")]
    InvalidBucketName(String),

    #[error("InvalidTag: The tag provided was not a valid tag.")]
    InvalidTag,

    // Auth
    #[error("AccessDenied: Access Denied.")]
    AccessDenied,

    #[error("InvalidAccessKeyId: The AWS access key Id you provided does not exist in our records.")]
    InvalidAccessKeyId,

    #[error("SignatureDoesNotMatch: The request signature we calculated does not match the signature you provided.")]
    SignatureDoesNotMatch,

    #[error("RequestTimeTooSkewed: The difference between the request time and the server's time is too large.")]
    RequestTimeTooSkewed,

    // Multipart
    #[error("InvalidPart: {0}")]
    InvalidPart(String),

    #[error("InvalidPartOrder: The list of parts was not in ascending order.")]
    InvalidPartOrder,

    #[error("EntityTooSmall: Your proposed upload is smaller than the minimum allowed size.")]
    EntityTooSmall,

    // Server
    #[error("InternalError: We encountered an internal error. Please try again.")]
    InternalError,
}

impl S3Error {
    /// Get the S3 error code
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::InvalidRequest(_) => "InvalidRequest",
            S3Error::InvalidArgument(_) => "InvalidArgument",
            S3Error::MalformedXML => "MalformedXML",
            S3Error::MissingContentLength => "MissingContentLength",
            S3Error::InvalidRange { .. } => "InvalidRange",
            S3Error::MethodNotAllowed => "MethodNotAllowed",
            S3Error::IncompleteBody => "IncompleteBody",
            S3Error::BadDigest => "BadDigest",
            S3Error::NoSuchBucket(_) => "NoSuchBucket",
            S3Error::NoSuchKey { .. } => "NoSuchKey",
            S3Error::NoSuchUpload(_) => "NoSuchUpload",
            S3Error::NoSuchTagSet => "NoSuchTagSet",
            S3Error::NoSuchCORSConfiguration => "NoSuchCORSConfiguration",
            S3Error::ConfigurationNotFound { code } => code,
            S3Error::BucketAlreadyExists(_) => "BucketAlreadyExists",
            S3Error::BucketAlreadyOwnedByYou(_) => "BucketAlreadyOwnedByYou",
            S3Error::BucketNotEmpty(_) => "BucketNotEmpty",
            S3Error::InvalidBucketName(_) => "InvalidBucketName",
            S3Error::InvalidTag => "InvalidTag",
            S3Error::AccessDenied => "AccessDenied",
            S3Error::InvalidAccessKeyId => "InvalidAccessKeyId",
            S3Error::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            S3Error::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            S3Error::InvalidPart(_) => "InvalidPart",
            S3Error::InvalidPartOrder => "InvalidPartOrder",
            S3Error::EntityTooSmall => "EntityTooSmall",
            S3Error::InternalError => "InternalError",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::InvalidRequest(_)
            | S3Error::InvalidArgument(_)
            | S3Error::MalformedXML
            | S3Error::IncompleteBody
            | S3Error::BadDigest
            | S3Error::InvalidBucketName(_)
            | S3Error::InvalidTag
            | S3Error::InvalidPart(_)
            | S3Error::InvalidPartOrder
            | S3Error::EntityTooSmall => StatusCode::BAD_REQUEST,
            S3Error::MissingContentLength => StatusCode::LENGTH_REQUIRED,
            S3Error::InvalidRange { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            S3Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            S3Error::NoSuchBucket(_)
            | S3Error::NoSuchKey { .. }
            | S3Error::NoSuchUpload(_)
            | S3Error::NoSuchTagSet
            | S3Error::NoSuchCORSConfiguration
            | S3Error::ConfigurationNotFound { .. } => StatusCode::NOT_FOUND,
            S3Error::BucketAlreadyExists(_)
            | S3Error::BucketAlreadyOwnedByYou(_)
            | S3Error::BucketNotEmpty(_) => StatusCode::CONFLICT,
            S3Error::AccessDenied
            | S3Error::InvalidAccessKeyId
            | S3Error::SignatureDoesNotMatch
            | S3Error::RequestTimeTooSkewed => StatusCode::FORBIDDEN,
            S3Error::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The human message, without the leading code prefix Display adds.
    fn message(&self) -> String {
        let full = self.to_string();
        match full.split_once(": ") {
            Some((_, msg)) => msg.to_string(),
            None => full,
        }
    }

    /// Generate the XML error body for a given request id.
    pub fn to_xml(&self, request_id: &str) -> String {
        let resource = match self {
            S3Error::NoSuchKey { key, .. } => key.as_str(),
            S3Error::NoSuchBucket(bucket)
            | S3Error::BucketNotEmpty(bucket)
            | S3Error::BucketAlreadyExists(bucket)
            | S3Error::BucketAlreadyOwnedByYou(bucket)
            | S3Error::InvalidBucketName(bucket) => bucket.as_str(),
            S3Error::NoSuchUpload(id) => id.as_str(),
            _ => "",
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
    <Code>{}</Code>
    <Message>{}</Message>
    <Resource>{}</Resource>
    <RequestId>{}</RequestId>
</Error>"#,
            self.code(),
            super::xml::escape_xml(&self.message()),
            super::xml::escape_xml(resource),
            request_id,
        )
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::new_v4().to_string();
        let status = self.status_code();
        let body = self.to_xml(&request_id);

        let mut response = (
            status,
            [
                (header::CONTENT_TYPE.as_str(), "application/xml".to_string()),
                ("x-amz-request-id", request_id),
            ],
            body,
        )
            .into_response();

        // 416 responses report the full length the range ran past.
        if let S3Error::InvalidRange { length } = &self {
            if let Ok(v) = format!("bytes */{length}").parse() {
                response.headers_mut().insert(header::CONTENT_RANGE, v);
            }
        }
        // A delete marker answering a lookup is a 404 plus breadcrumbs.
        if let S3Error::NoSuchKey {
            delete_marker: Some(version_id),
            ..
        } = &self
        {
            let headers = response.headers_mut();
            headers.insert("x-amz-delete-marker", "true".parse().unwrap());
            if let Ok(v) = version_id.parse() {
                headers.insert("x-amz-version-id", v);
            }
        }

        response
    }
}

impl From<StorageError> for S3Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::BucketNotFound(b) => S3Error::NoSuchBucket(b),
            // Single-credential deployment: a name collision is always a
            // bucket the caller already owns.
            StorageError::BucketAlreadyExists(b) => S3Error::BucketAlreadyOwnedByYou(b),
            StorageError::BucketNotEmpty(b) => S3Error::BucketNotEmpty(b),
            StorageError::ObjectNotFound(key) => S3Error::NoSuchKey {
                key,
                delete_marker: None,
            },
            StorageError::DeleteMarkerFound { version_id } => S3Error::NoSuchKey {
                key: String::new(),
                delete_marker: Some(version_id),
            },
            StorageError::UploadNotFound(id) => S3Error::NoSuchUpload(id),
            StorageError::InvalidPart(msg) => S3Error::InvalidPart(msg),
            StorageError::InvalidPartOrder => S3Error::InvalidPartOrder,
            StorageError::EntityTooSmall => S3Error::EntityTooSmall,
            StorageError::InvalidRange { length } => S3Error::InvalidRange { length },
            StorageError::PayloadHashMismatch => S3Error::SignatureDoesNotMatch,
            StorageError::DigestMismatch => S3Error::BadDigest,
            StorageError::IncompleteBody => S3Error::IncompleteBody,
            StorageError::BodyRead(e) => {
                // The chunk decoder signals a failed chunk signature
                // through the body stream.
                if e.get_ref()
                    .is_some_and(|inner| inner.is::<super::aws_chunked::ChunkSignatureMismatch>())
                {
                    return S3Error::SignatureDoesNotMatch;
                }
                if e.kind() == std::io::ErrorKind::InvalidData {
                    return S3Error::InvalidRequest(
                        "Malformed chunked payload encoding".to_string(),
                    );
                }
                warn!(error = %e, "request body read failed");
                S3Error::IncompleteBody
            }
            other => {
                error!(error = %other, "storage error escalated to InternalError");
                S3Error::InternalError
            }
        }
    }
}
