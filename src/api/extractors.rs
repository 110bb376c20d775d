//! Custom Axum extractors for S3 API validation
//!
//! These extractors validate S3 request path parameters before a handler
//! runs, eliminating repetitive validation code from handlers.

use super::errors::S3Error;
use crate::types::{validate_bucket_name, validate_object_key};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path},
    http::request::Parts,
};

/// Bucket name extractor with S3 naming validation.
#[derive(Debug, Clone)]
pub struct ValidatedBucket(pub String);

impl std::ops::Deref for ValidatedBucket {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ValidatedBucket
where
    S: Send + Sync,
{
    type Rejection = S3Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(bucket): Path<String> = Path::from_request_parts(parts, state)
            .await
            .map_err(|_| S3Error::InvalidArgument("Invalid bucket path".to_string()))?;

        validate_bucket_name(&bucket).map_err(|_| S3Error::InvalidBucketName(bucket.clone()))?;
        Ok(ValidatedBucket(bucket))
    }
}

/// Bucket + key extractor; the key is normalized (no leading slashes) and
/// checked for filesystem hazards.
#[derive(Debug, Clone)]
pub struct ValidatedPath {
    pub bucket: String,
    pub key: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for ValidatedPath
where
    S: Send + Sync,
{
    type Rejection = S3Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path((bucket, key)): Path<(String, String)> = Path::from_request_parts(parts, state)
            .await
            .map_err(|_| S3Error::InvalidArgument("Invalid bucket/key path".to_string()))?;

        validate_bucket_name(&bucket).map_err(|_| S3Error::InvalidBucketName(bucket.clone()))?;

        let key = key.trim_start_matches('/').to_string();
        validate_object_key(&key).map_err(|e| S3Error::InvalidArgument(e.to_string()))?;

        Ok(ValidatedPath { bucket, key })
    }
}
