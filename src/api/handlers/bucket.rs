//! Bucket-level handlers: CRUD, listings, versioning, config facets

use super::config::{self, BUCKET_FACETS};
use super::{query_keys, AppState};
use crate::api::errors::S3Error;
use crate::api::extractors::ValidatedBucket;
use crate::api::xml::{
    self, BucketInfo, DeleteError, DeleteRequest, DeleteResult, DeletedObject, ListBucketResult,
    ListBucketsResult, ListVersionsXml, VersionXmlEntry, VersioningConfigurationRequest,
};
use crate::engine::{partition_entries, DeleteOutcome, ListEntry};
use crate::types::{validate_canned_acl, validate_prefix, VersioningState, NULL_VERSION_ID};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Query parameters for bucket-level GET operations
#[derive(Debug, Deserialize, Default)]
pub struct BucketGetQuery {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    #[serde(rename = "list-type")]
    pub list_type: Option<u8>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<u32>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
    #[serde(rename = "start-after")]
    pub start_after: Option<String>,
    pub marker: Option<String>,
    #[serde(rename = "encoding-type")]
    pub encoding_type: Option<String>,
    #[serde(rename = "key-marker")]
    pub key_marker: Option<String>,
    #[serde(rename = "version-id-marker")]
    pub version_id_marker: Option<String>,
    #[serde(rename = "upload-id-marker")]
    pub upload_id_marker: Option<String>,
    #[serde(rename = "max-uploads")]
    pub max_uploads: Option<u32>,
}

/// Continuation tokens are the last emitted name, base64-wrapped so they
/// read as opaque.
fn encode_continuation_token(name: &str) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(name)
}

fn decode_continuation_token(token: &str) -> Result<String, S3Error> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| S3Error::InvalidArgument("Invalid continuation token".to_string()))?;
    String::from_utf8(bytes)
        .map_err(|_| S3Error::InvalidArgument("Invalid continuation token".to_string()))
}

/// Clamp max-keys/max-uploads into S3's 0..=1000 window.
fn clamp_max(requested: Option<u32>) -> usize {
    requested.unwrap_or(1000).min(1000) as usize
}

/// LIST buckets handler
/// GET /
#[instrument(skip(state))]
pub async fn list_buckets(State(state): State<Arc<AppState>>) -> Result<Response, S3Error> {
    info!("LIST buckets");

    let buckets = state.engine.list_buckets().await?;
    let result = ListBucketsResult {
        buckets: buckets
            .into_iter()
            .map(|b| BucketInfo {
                name: b.name,
                creation_date: b.created_at,
            })
            .collect(),
    };

    Ok((
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        result.to_xml(),
    )
        .into_response())
}

/// Bucket-level GET dispatch:
///   ?location            -> GetBucketLocation
///   ?versioning          -> GetBucketVersioning
///   ?versions            -> ListObjectVersions
///   ?uploads             -> ListMultipartUploads
///   ?acl|?tagging|...    -> pass-through facet GET
///   otherwise            -> ListObjects (v1, or v2 with list-type=2)
#[instrument(skip(state, query))]
pub async fn get_bucket(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
    uri: Uri,
    Query(query): Query<BucketGetQuery>,
) -> Result<Response, S3Error> {
    let keys = query_keys(&uri);

    if keys.contains("location") {
        state.engine.bucket(&bucket).await?;
        return Ok((
            StatusCode::OK,
            [("Content-Type", "application/xml")],
            xml::location_constraint_xml(&state.region),
        )
            .into_response());
    }

    if keys.contains("versioning") {
        let versioning = state.engine.versioning(&bucket).await?;
        return Ok((
            StatusCode::OK,
            [("Content-Type", "application/xml")],
            xml::versioning_configuration_xml(versioning.status_element()),
        )
            .into_response());
    }

    if keys.contains("versions") {
        return list_object_versions(&state, &bucket, &query).await;
    }

    if keys.contains("uploads") {
        return super::multipart::list_multipart_uploads(&state, &bucket, &query).await;
    }

    if let Some(spec) = config::facet_for_query(BUCKET_FACETS, &keys) {
        return config::get_bucket_facet(&state, &bucket, spec).await;
    }

    list_objects(&state, &bucket, &query).await
}

/// ListObjects v1 and v2.
async fn list_objects(
    state: &Arc<AppState>,
    bucket: &str,
    query: &BucketGetQuery,
) -> Result<Response, S3Error> {
    let prefix = query.prefix.clone().unwrap_or_default();
    validate_prefix(&prefix).map_err(|e| S3Error::InvalidArgument(e.to_string()))?;
    let delimiter = query.delimiter.clone().filter(|d| !d.is_empty());
    let max_keys = clamp_max(query.max_keys);
    let is_v2 = query.list_type == Some(2);
    if let Some(lt) = query.list_type {
        if lt != 2 {
            return Err(S3Error::InvalidArgument(format!(
                "Invalid List Type: {lt}"
            )));
        }
    }

    // v2 paginates by continuation token (falling back to start-after);
    // v1 by marker.
    let start_after = if is_v2 {
        match &query.continuation_token {
            Some(token) => decode_continuation_token(token)?,
            None => query.start_after.clone().unwrap_or_default(),
        }
    } else {
        query.marker.clone().unwrap_or_default()
    };

    info!("LIST {}/{}*", bucket, prefix);

    let listing = state
        .engine
        .list_objects(bucket, &prefix, delimiter.as_deref(), &start_after, max_keys)
        .await?;

    let next_cursor = listing.next_cursor.clone();
    let is_truncated = listing.is_truncated;
    let (contents, common_prefixes) = partition_entries(listing.entries);

    let result = ListBucketResult {
        name: bucket.to_string(),
        prefix,
        delimiter,
        max_keys,
        is_truncated,
        contents,
        common_prefixes,
        continuation_token: query.continuation_token.clone(),
        next_continuation_token: if is_v2 {
            next_cursor.as_deref().map(encode_continuation_token)
        } else {
            None
        },
        start_after: query.start_after.clone(),
        marker: if is_v2 { None } else { query.marker.clone() },
        next_marker: if is_v2 { None } else { next_cursor },
        encoding_type: query.encoding_type.clone(),
        is_v1: !is_v2,
    };

    Ok((
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        result.to_xml(),
    )
        .into_response())
}

/// GET /{bucket}?versions
async fn list_object_versions(
    state: &Arc<AppState>,
    bucket: &str,
    query: &BucketGetQuery,
) -> Result<Response, S3Error> {
    let prefix = query.prefix.clone().unwrap_or_default();
    validate_prefix(&prefix).map_err(|e| S3Error::InvalidArgument(e.to_string()))?;
    let delimiter = query.delimiter.clone().filter(|d| !d.is_empty());
    let key_marker = query.key_marker.clone().unwrap_or_default();
    let version_id_marker = query.version_id_marker.clone().unwrap_or_default();
    let max_keys = clamp_max(query.max_keys);

    info!("LIST versions {}/{}*", bucket, prefix);

    let listing = state
        .engine
        .list_versions(
            bucket,
            &prefix,
            delimiter.as_deref(),
            &key_marker,
            &version_id_marker,
            max_keys,
        )
        .await?;

    let entries = listing
        .entries
        .into_iter()
        .map(|entry| match entry {
            ListEntry::Object(o) if o.kind == crate::types::ObjectKind::DeleteMarker => {
                VersionXmlEntry::DeleteMarker(o)
            }
            ListEntry::Object(o) => VersionXmlEntry::Version(o),
            ListEntry::CommonPrefix(p) => VersionXmlEntry::CommonPrefix(p),
        })
        .collect();

    let result = ListVersionsXml {
        name: bucket.to_string(),
        prefix,
        delimiter,
        key_marker,
        version_id_marker,
        next_key_marker: listing.next_key_marker,
        next_version_id_marker: listing.next_version_id_marker,
        max_keys,
        is_truncated: listing.is_truncated,
        entries,
    };

    Ok((
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        result.to_xml(),
    )
        .into_response())
}

/// Bucket-level PUT dispatch: config facets, versioning, else CreateBucket.
#[instrument(skip(state, headers, body))]
pub async fn put_bucket(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    let keys = query_keys(&uri);

    if keys.contains("versioning") {
        return put_bucket_versioning(&state, &bucket, &body).await;
    }

    if let Some(spec) = config::facet_for_query(BUCKET_FACETS, &keys) {
        // Canned ACL header wins over an XML body when both are present.
        if spec.name == "acl" {
            if let Some(canned) = headers.get("x-amz-acl").and_then(|v| v.to_str().ok()) {
                validate_canned_acl(canned)
                    .map_err(|e| S3Error::InvalidArgument(e.to_string()))?;
                state
                    .engine
                    .put_bucket_config(&bucket, "acl", canned.as_bytes().to_vec())
                    .await?;
                return Ok(StatusCode::OK.into_response());
            }
        }
        return config::put_bucket_facet(&state, &bucket, spec, &body).await;
    }

    info!("CREATE bucket {}", bucket);
    state.engine.create_bucket(&bucket).await?;
    Ok((StatusCode::OK, [("Location", format!("/{bucket}"))], "").into_response())
}

/// PUT /{bucket}?versioning
async fn put_bucket_versioning(
    state: &Arc<AppState>,
    bucket: &str,
    body: &Bytes,
) -> Result<Response, S3Error> {
    let body_str = std::str::from_utf8(body).map_err(|_| S3Error::MalformedXML)?;
    let request = VersioningConfigurationRequest::from_xml(body_str).map_err(|e| {
        warn!("Failed to parse VersioningConfiguration XML: {}", e);
        S3Error::MalformedXML
    })?;

    let target = match request.status.as_deref() {
        Some("Enabled") => VersioningState::Enabled,
        Some("Suspended") => VersioningState::Suspended,
        Some(other) => {
            return Err(S3Error::InvalidArgument(format!(
                "Invalid versioning status: {other}"
            )))
        }
        // An empty configuration is accepted and leaves the state alone.
        None => return Ok(StatusCode::OK.into_response()),
    };

    info!("PUT versioning {} -> {:?}", bucket, target);
    state.engine.set_versioning(bucket, target).await?;
    Ok(StatusCode::OK.into_response())
}

/// Bucket-level DELETE dispatch: config facets, else DeleteBucket.
#[instrument(skip(state))]
pub async fn delete_bucket(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
    uri: Uri,
) -> Result<Response, S3Error> {
    let keys = query_keys(&uri);

    if let Some(spec) = config::facet_for_query(BUCKET_FACETS, &keys) {
        return config::delete_bucket_facet(&state, &bucket, spec).await;
    }

    info!("DELETE bucket {}", bucket);
    state.engine.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// HEAD bucket handler
/// HEAD /{bucket}
#[instrument(skip(state))]
pub async fn head_bucket(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
) -> Result<Response, S3Error> {
    state.engine.bucket(&bucket).await?;
    Ok((
        StatusCode::OK,
        [("x-amz-bucket-region", state.region.clone())],
    )
        .into_response())
}

/// Query parameters for bucket-level POST operations
#[derive(Debug, Deserialize, Default)]
pub struct BucketPostQuery {
    pub delete: Option<String>,
}

/// DELETE multiple objects handler
/// POST /{bucket}?delete
#[instrument(skip(state, body))]
pub async fn post_bucket(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
    Query(query): Query<BucketPostQuery>,
    body: Bytes,
) -> Result<Response, S3Error> {
    if query.delete.is_none() {
        return Err(S3Error::InvalidRequest(
            "POST requires ?delete query parameter".to_string(),
        ));
    }

    let body_str = std::str::from_utf8(&body).map_err(|_| S3Error::MalformedXML)?;
    let delete_req = DeleteRequest::from_xml(body_str).map_err(|e| {
        warn!("Failed to parse DeleteObjects XML: {}", e);
        S3Error::MalformedXML
    })?;

    info!(
        "DELETE multiple objects in {} ({} objects)",
        bucket,
        delete_req.objects.len()
    );

    let quiet = delete_req.quiet.unwrap_or(false);
    let mut result = DeleteResult::default();

    // Each entry succeeds or fails on its own; a missing key is still a
    // successful delete in S3.
    for obj in delete_req.objects {
        let key = obj.key.trim_start_matches('/').to_string();
        let version = obj
            .version_id
            .as_deref()
            .filter(|v| !v.is_empty() && *v != NULL_VERSION_ID);

        match state.engine.delete_object(&bucket, &key, version).await {
            Ok(outcome) => {
                debug!("Deleted {}/{}", bucket, key);
                let (delete_marker, delete_marker_version_id) = match &outcome {
                    DeleteOutcome::MarkerCreated { version_id } => {
                        (true, Some(version_id.clone()))
                    }
                    DeleteOutcome::VersionDeleted {
                        was_marker: true,
                        version_id,
                    } => (true, Some(version_id.clone())),
                    _ => (false, None),
                };
                result.deleted.push(DeletedObject {
                    key: obj.key.clone(),
                    version_id: obj.version_id.clone(),
                    delete_marker,
                    delete_marker_version_id,
                });
            }
            Err(e) => {
                let s3_err = S3Error::from(e);
                // NoSuchKey counts as success in batch delete.
                if matches!(s3_err, S3Error::NoSuchKey { .. }) {
                    result.deleted.push(DeletedObject {
                        key: obj.key.clone(),
                        version_id: obj.version_id.clone(),
                        delete_marker: false,
                        delete_marker_version_id: None,
                    });
                } else {
                    warn!("Failed to delete {}/{}: {}", bucket, key, s3_err);
                    result.errors.push(DeleteError {
                        key: obj.key.clone(),
                        version_id: obj.version_id.clone(),
                        code: s3_err.code().to_string(),
                        message: s3_err.to_string(),
                    });
                }
            }
        }
    }

    Ok((
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        result.to_xml(quiet),
    )
        .into_response())
}
