//! Multipart upload handlers

use super::bucket::BucketGetQuery;
use super::object::ObjectQuery;
use super::{extract_put_metadata, prepare_body, AppState};
use crate::api::errors::S3Error;
use crate::api::extractors::ValidatedPath;
use crate::api::xml::{
    CompleteMultipartUploadRequest, CompleteMultipartUploadResult, CopyObjectResult,
    InitiateMultipartUploadResult, ListMultipartUploadsXml, ListPartsXml, PartInfoXml,
    UploadInfoXml,
};
use crate::engine::CompletedPart;
use crate::types::NULL_VERSION_ID;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// POST object handler for multipart upload operations
/// POST /{bucket}/{key}?uploads - CreateMultipartUpload
/// POST /{bucket}/{key}?uploadId=X - CompleteMultipartUpload
#[instrument(skip(state, query, headers, body))]
pub async fn post_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    uri: Uri,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, S3Error> {
    let keys = super::query_keys(&uri);

    // CreateMultipartUpload
    if keys.contains("uploads") {
        info!("CreateMultipartUpload {}/{}", bucket, key);

        let meta = extract_put_metadata(&headers)?;
        let upload = state.engine.create_upload(&bucket, &key, meta).await?;

        let result = InitiateMultipartUploadResult {
            bucket: bucket.clone(),
            key: key.clone(),
            upload_id: upload.upload_id,
        };
        return Ok((
            StatusCode::OK,
            [("Content-Type", "application/xml")],
            result.to_xml(),
        )
            .into_response());
    }

    // CompleteMultipartUpload
    if let Some(upload_id) = &query.upload_id {
        info!(
            "CompleteMultipartUpload {}/{} uploadId={}",
            bucket, key, upload_id
        );

        let body_str = std::str::from_utf8(&body).map_err(|_| S3Error::MalformedXML)?;
        let complete_req = CompleteMultipartUploadRequest::from_xml(body_str).map_err(|e| {
            warn!("Failed to parse CompleteMultipartUpload XML: {}", e);
            S3Error::MalformedXML
        })?;

        let requested: Vec<CompletedPart> = complete_req
            .parts
            .iter()
            .map(|p| CompletedPart {
                part_number: p.part_number,
                etag: p.etag.clone(),
            })
            .collect();

        let outcome = state
            .engine
            .complete_upload(&bucket, &key, upload_id, &requested)
            .await?;

        let result = CompleteMultipartUploadResult {
            location: format!("/{bucket}/{key}"),
            bucket: bucket.clone(),
            key: key.clone(),
            etag: outcome.version.quoted_etag(),
        };

        let mut response_headers = HeaderMap::new();
        response_headers.insert("Content-Type", "application/xml".parse().unwrap());
        if outcome.version.version_id != NULL_VERSION_ID {
            if let Ok(v) = outcome.version.version_id.parse() {
                response_headers.insert("x-amz-version-id", v);
            }
        }
        return Ok((StatusCode::OK, response_headers, result.to_xml()).into_response());
    }

    Err(S3Error::InvalidRequest(
        "POST on object requires ?uploads or ?uploadId parameter".to_string(),
    ))
}

/// UploadPart / UploadPartCopy, dispatched from the object PUT handler.
pub async fn upload_part(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: u32,
    request: axum::http::Request<Body>,
) -> Result<Response, S3Error> {
    // UploadPartCopy: source named by header, no body.
    if request.headers().contains_key("x-amz-copy-source") {
        let (src_bucket, src_key, src_version) = super::object::parse_copy_source(request.headers())?;
        info!(
            "UploadPartCopy {}/{} part={} from {}/{}",
            bucket, key, part_number, src_bucket, src_key
        );
        let (etag, last_modified) = state
            .engine
            .upload_part_copy(
                bucket,
                key,
                upload_id,
                part_number,
                &src_bucket,
                &src_key,
                src_version.as_deref(),
            )
            .await?;
        let result = CopyObjectResult {
            etag,
            last_modified,
        };
        return Ok((
            StatusCode::OK,
            [("Content-Type", "application/xml")],
            result.to_part_xml(),
        )
            .into_response());
    }

    info!(
        "UploadPart {}/{} part={} uploadId={}",
        bucket, key, part_number, upload_id
    );

    let (parts, body) = request.into_parts();
    let (stream, checks) = prepare_body(&parts.headers, &parts.extensions, body, false)?;

    let etag = state
        .engine
        .upload_part(bucket, key, upload_id, part_number, stream, checks)
        .await?;

    Ok((StatusCode::OK, [("ETag", etag)], "").into_response())
}

/// ListParts, dispatched from the object GET handler.
pub async fn list_parts(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    upload_id: &str,
    query: &ObjectQuery,
) -> Result<Response, S3Error> {
    info!("ListParts {}/{} uploadId={}", bucket, key, upload_id);

    let marker = query.part_number_marker.unwrap_or(0);
    let max_parts = query.max_parts.unwrap_or(1000).min(1000) as usize;

    let listing = state
        .engine
        .list_parts(bucket, key, upload_id, marker, max_parts)
        .await?;

    let result = ListPartsXml {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id: upload_id.to_string(),
        part_number_marker: marker,
        next_part_number_marker: listing.next_part_number_marker,
        parts: listing
            .parts
            .into_iter()
            .map(|p| PartInfoXml {
                part_number: p.part_number,
                etag: format!("\"{}\"", p.etag),
                size: p.size,
                last_modified: p.uploaded_at,
            })
            .collect(),
        max_parts,
        is_truncated: listing.is_truncated,
    };

    Ok((
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        result.to_xml(),
    )
        .into_response())
}

/// ListMultipartUploads, dispatched from the bucket GET handler.
pub async fn list_multipart_uploads(
    state: &Arc<AppState>,
    bucket: &str,
    query: &BucketGetQuery,
) -> Result<Response, S3Error> {
    let prefix = query.prefix.clone().unwrap_or_default();
    let key_marker = query.key_marker.clone().unwrap_or_default();
    let upload_id_marker = query.upload_id_marker.clone().unwrap_or_default();
    let max_uploads = query.max_uploads.unwrap_or(1000).min(1000) as usize;

    info!("ListMultipartUploads {}/{}*", bucket, prefix);

    let listing = state
        .engine
        .list_uploads(bucket, &prefix, &key_marker, &upload_id_marker, max_uploads)
        .await?;

    let result = ListMultipartUploadsXml {
        bucket: bucket.to_string(),
        prefix,
        key_marker,
        upload_id_marker,
        next_key_marker: listing.next_key_marker,
        next_upload_id_marker: listing.next_upload_id_marker,
        uploads: listing
            .uploads
            .into_iter()
            .map(|u| UploadInfoXml {
                key: u.key,
                upload_id: u.upload_id,
                initiated: u.initiated_at,
            })
            .collect(),
        max_uploads,
        is_truncated: listing.is_truncated,
    };

    Ok((
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        result.to_xml(),
    )
        .into_response())
}
