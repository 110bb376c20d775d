//! S3 API request handlers and router
//!
//! Dispatch follows S3's addressing: method × (bucket, key) × query
//! sub-resource × discriminating headers. The router only splits paths;
//! each method handler inspects the query keys to pick the operation.

mod bucket;
mod config;
mod multipart;
mod object;

use crate::api::aws_chunked::{self, ChunkVerifier};
use crate::api::cors;
use crate::api::errors::S3Error;
use crate::api::xml;
use crate::blob::ByteStream;
use crate::engine::{PutChecks, StorageEngine};
use crate::types::{validate_canned_acl, PutMetadata, SystemMetadata};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::TryStreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Application state shared across handlers
pub struct AppState {
    pub engine: StorageEngine,
    pub region: String,
}

/// Build the S3 router.
///
/// S3 API paths:
///   GET / - list buckets
///   PUT /{bucket} - create bucket (or bucket config with a sub-resource)
///   GET /{bucket} - list objects / bucket config sub-resources
///   POST /{bucket}?delete - delete multiple objects
///   PUT /{bucket}/{key...} - upload object, copy, or upload part
///   GET /{bucket}/{key...} - download object / list parts / object config
///   POST /{bucket}/{key...} - multipart create/complete
///   DELETE /{bucket}/{key...} - delete object / abort upload
///   OPTIONS - CORS preflight against stored bucket rules
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Root: list buckets + HEAD probe for S3 client compatibility
        .route("/", get(bucket::list_buckets).head(head_root))
        // Object operations (wildcard routes first - more specific)
        .route(
            "/:bucket/*key",
            get(object::get_object)
                .put(object::put_object)
                .delete(object::delete_object)
                .head(object::head_object)
                .post(multipart::post_object)
                .options(preflight_object),
        )
        // Bucket operations (without trailing slash)
        .route(
            "/:bucket",
            get(bucket::get_bucket)
                .put(bucket::put_bucket)
                .delete(bucket::delete_bucket)
                .head(bucket::head_bucket)
                .post(bucket::post_bucket)
                .options(preflight_bucket),
        )
        // Bucket operations (with trailing slash)
        .route(
            "/:bucket/",
            get(bucket::get_bucket)
                .put(bucket::put_bucket)
                .delete(bucket::delete_bucket)
                .head(bucket::head_bucket)
                .post(bucket::post_bucket)
                .options(preflight_bucket),
        )
        .with_state(state)
}

/// HEAD /: unauthenticated connection probe; real S3 returns 200.
async fn head_root() -> StatusCode {
    StatusCode::OK
}

/// The set of query keys present on a request, values ignored. S3
/// sub-resources are bare keys (`?acl`, `?tagging`), which is exactly the
/// shape this dispatch needs.
pub(crate) fn query_keys(uri: &Uri) -> HashSet<String> {
    uri.query()
        .unwrap_or("")
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let key = pair.split_once('=').map(|(k, _)| k).unwrap_or(pair);
            urlencoding::decode(key)
                .map(|k| k.into_owned())
                .unwrap_or_else(|_| key.to_string())
        })
        .collect()
}

/// Collect the metadata a PUT/CreateMultipartUpload request attaches to
/// its object.
pub(crate) fn extract_put_metadata(headers: &HeaderMap) -> Result<PutMetadata, S3Error> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let mut user_metadata = HashMap::new();
    for (name, value) in headers {
        if let Some(suffix) = name.as_str().strip_prefix("x-amz-meta-") {
            if let Ok(v) = value.to_str() {
                user_metadata.insert(suffix.to_string(), v.to_string());
            }
        }
    }

    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };

    // aws-chunked is transport framing, not object metadata.
    let content_encoding = header_str("content-encoding").and_then(|value| {
        let remaining: Vec<&str> = value
            .split(',')
            .map(str::trim)
            .filter(|v| !v.eq_ignore_ascii_case("aws-chunked") && !v.is_empty())
            .collect();
        if remaining.is_empty() {
            None
        } else {
            Some(remaining.join(", "))
        }
    });

    let system_metadata = SystemMetadata {
        cache_control: header_str("cache-control"),
        content_disposition: header_str("content-disposition"),
        content_encoding,
        content_language: header_str("content-language"),
        expires: header_str("expires"),
    };

    let tags = headers
        .get("x-amz-tagging")
        .and_then(|v| v.to_str().ok())
        .and_then(xml::tagging_from_header);

    let acl = match headers.get("x-amz-acl").and_then(|v| v.to_str().ok()) {
        Some(value) => {
            validate_canned_acl(value).map_err(|e| S3Error::InvalidArgument(e.to_string()))?;
            Some(value.to_string())
        }
        None => None,
    };

    Ok(PutMetadata {
        content_type,
        user_metadata,
        system_metadata,
        tags,
        acl,
    })
}

/// Turn a request body into the byte stream and integrity checks the
/// engine consumes. Chunk-signed bodies are laundered through the
/// decoder; the engine only ever sees raw payload bytes.
pub(crate) fn prepare_body(
    headers: &HeaderMap,
    extensions: &axum::http::Extensions,
    body: Body,
    length_required: bool,
) -> Result<(ByteStream, PutChecks), S3Error> {
    let raw: ByteStream = Box::pin(
        body.into_data_stream()
            .map_err(|e| std::io::Error::other(e.to_string())),
    );

    let mut checks = PutChecks::default();

    let stream = if aws_chunked::is_aws_chunked(headers) {
        checks.content_length = aws_chunked::get_decoded_content_length(headers);
        let verifier = extensions.get::<ChunkVerifier>().cloned();
        aws_chunked::decode_body(raw, verifier)
    } else {
        checks.content_length = headers
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        checks.sha256_hex = extensions
            .get::<crate::api::auth::ExpectedBodySha256>()
            .map(|e| e.0.clone());
        raw
    };

    if length_required && checks.content_length.is_none() {
        return Err(S3Error::MissingContentLength);
    }

    if let Some(content_md5) = headers.get("content-md5").and_then(|v| v.to_str().ok()) {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(content_md5.trim())
            .map_err(|_| S3Error::InvalidArgument("Invalid Content-MD5 encoding".to_string()))?;
        checks.md5_hex = Some(hex::encode(decoded));
    }

    Ok((stream, checks))
}

/// CORS preflight for bucket-level URLs.
async fn preflight_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    headers: HeaderMap,
) -> Response {
    preflight(&state, &bucket, &headers).await
}

/// CORS preflight for object URLs.
async fn preflight_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, _key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    preflight(&state, &bucket, &headers).await
}

/// Match a preflight against the bucket's stored CORS rules and reflect
/// the allowed origin/methods/headers. No stored configuration means a
/// bare 200 with no CORS headers.
async fn preflight(state: &Arc<AppState>, bucket: &str, headers: &HeaderMap) -> Response {
    let origin = headers
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let method = headers
        .get("access-control-request-method")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let stored = match state.engine.get_bucket_config(bucket, "cors").await {
        Ok(Some(body)) => body,
        _ => return StatusCode::OK.into_response(),
    };
    let Ok(doc) = String::from_utf8(stored) else {
        return StatusCode::OK.into_response();
    };
    let Ok(parsed) = cors::CorsConfiguration::from_xml(&doc) else {
        return StatusCode::OK.into_response();
    };

    match cors::match_rules(&parsed, origin, method) {
        Some(matched) => {
            debug!(bucket, origin, method, "CORS preflight matched");
            let mut response = StatusCode::OK.into_response();
            let h = response.headers_mut();
            let insert = |h: &mut HeaderMap, name: &'static str, value: &str| {
                if let Ok(v) = value.parse() {
                    h.insert(name, v);
                }
            };
            insert(h, "access-control-allow-origin", &matched.allowed_origin);
            insert(
                h,
                "access-control-allow-methods",
                &matched.allowed_methods.join(", "),
            );
            if !matched.allowed_headers.is_empty() {
                insert(
                    h,
                    "access-control-allow-headers",
                    &matched.allowed_headers.join(", "),
                );
            }
            if !matched.expose_headers.is_empty() {
                insert(
                    h,
                    "access-control-expose-headers",
                    &matched.expose_headers.join(", "),
                );
            }
            if let Some(age) = matched.max_age_seconds {
                insert(h, "access-control-max-age", &age.to_string());
            }
            response
        }
        None => S3Error::AccessDenied.into_response(),
    }
}
