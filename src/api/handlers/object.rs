//! Object-level handlers: get, head, put, copy, delete, object facets

use super::{extract_put_metadata, prepare_body, query_keys, AppState};
use crate::api::errors::S3Error;
use crate::api::extractors::ValidatedPath;
use crate::api::xml::{self, CopyObjectResult, ObjectAttributesXml};
use crate::engine::{DeleteOutcome, RangeRequest};
use crate::types::{validate_canned_acl, ObjectVersion, NULL_VERSION_ID};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Query parameters for object-level operations
#[derive(Debug, Deserialize, Default)]
pub struct ObjectQuery {
    #[serde(rename = "versionId")]
    pub version_id: Option<String>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    #[serde(rename = "partNumber")]
    pub part_number: Option<u32>,
    #[serde(rename = "part-number-marker")]
    pub part_number_marker: Option<u32>,
    #[serde(rename = "max-parts")]
    pub max_parts: Option<u32>,
}

impl ObjectQuery {
    /// The version the request addresses; the literal `null` selects the
    /// null version row.
    fn version(&self) -> Option<&str> {
        self.version_id.as_deref().filter(|v| !v.is_empty())
    }
}

/// GET object dispatch:
///   ?uploadId      -> ListParts
///   ?attributes    -> GetObjectAttributes
///   ?acl|?tagging|?retention|?legal-hold -> object facet GET
///   otherwise      -> GetObject (range + conditionals)
#[instrument(skip(state, query, headers))]
pub async fn get_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    uri: Uri,
    axum::extract::Query(query): axum::extract::Query<ObjectQuery>,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    if let Some(upload_id) = &query.upload_id {
        return super::multipart::list_parts(&state, &bucket, &key, upload_id, &query).await;
    }

    let keys = query_keys(&uri);
    if keys.contains("attributes") {
        return get_object_attributes(&state, &bucket, &key, query.version(), &headers).await;
    }
    if keys.contains("tagging") {
        return get_object_tagging(&state, &bucket, &key, query.version()).await;
    }
    if keys.contains("acl") {
        return get_object_acl(&state, &bucket, &key, query.version()).await;
    }
    if keys.contains("retention") {
        return get_object_retention(&state, &bucket, &key, query.version()).await;
    }
    if keys.contains("legal-hold") {
        return get_object_legal_hold(&state, &bucket, &key, query.version()).await;
    }

    info!("GET {}/{}", bucket, key);

    let version = state.engine.lookup(&bucket, &key, query.version()).await?;
    if let Some(response) = eval_conditionals(&version, &headers) {
        return Ok(response);
    }

    let range = parse_range(&headers);
    let outcome = state.engine.open_object(&version, range).await?;

    let mut response_headers = object_headers(&version);
    response_headers.insert(
        header::CONTENT_LENGTH,
        hval(&outcome.content_length.to_string()),
    );

    let status = match outcome.content_range {
        Some((first, last, total)) => {
            response_headers.insert(
                header::CONTENT_RANGE,
                hval(&format!("bytes {first}-{last}/{total}")),
            );
            StatusCode::PARTIAL_CONTENT
        }
        None => StatusCode::OK,
    };

    debug!(
        size = outcome.content_length,
        ranged = outcome.content_range.is_some(),
        "streaming object"
    );
    Ok((status, response_headers, Body::from_stream(outcome.body)).into_response())
}

/// HEAD object handler
/// HEAD /{bucket}/{key}
#[instrument(skip(state, query, headers))]
pub async fn head_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    axum::extract::Query(query): axum::extract::Query<ObjectQuery>,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    info!("HEAD {}/{}", bucket, key);

    let version = state.engine.lookup(&bucket, &key, query.version()).await?;
    if let Some(response) = eval_conditionals(&version, &headers) {
        return Ok(response);
    }

    let mut response_headers = object_headers(&version);
    response_headers.insert(header::CONTENT_LENGTH, hval(&version.size.to_string()));
    Ok((StatusCode::OK, response_headers).into_response())
}

/// PUT object dispatch:
///   ?partNumber&uploadId          -> UploadPart / UploadPartCopy
///   ?acl|?tagging|?retention|?legal-hold -> object facet PUT
///   x-amz-copy-source header      -> CopyObject
///   otherwise                     -> PutObject
#[instrument(skip(state, query, request))]
pub async fn put_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    uri: Uri,
    axum::extract::Query(query): axum::extract::Query<ObjectQuery>,
    request: axum::http::Request<Body>,
) -> Result<Response, S3Error> {
    if let (Some(part_number), Some(upload_id)) = (query.part_number, &query.upload_id) {
        return super::multipart::upload_part(
            &state,
            &bucket,
            &key,
            upload_id,
            part_number,
            request,
        )
        .await;
    }

    let keys = query_keys(&uri);
    if keys.contains("tagging") {
        let body = read_body(request).await?;
        return put_object_tagging(&state, &bucket, &key, query.version(), &body).await;
    }
    if keys.contains("acl") {
        let (parts, body) = request.into_parts();
        let body = collect_bytes(body).await?;
        return put_object_acl(&state, &bucket, &key, query.version(), &parts.headers, &body)
            .await;
    }
    if keys.contains("retention") {
        let body = read_body(request).await?;
        return put_object_retention(&state, &bucket, &key, query.version(), &body).await;
    }
    if keys.contains("legal-hold") {
        let body = read_body(request).await?;
        return put_object_legal_hold(&state, &bucket, &key, query.version(), &body).await;
    }

    if request.headers().contains_key("x-amz-copy-source") {
        return copy_object(&state, &bucket, &key, request.headers()).await;
    }

    let (parts, body) = request.into_parts();
    info!("PUT {}/{}", bucket, key);

    let meta = extract_put_metadata(&parts.headers)?;
    let (stream, checks) = prepare_body(&parts.headers, &parts.extensions, body, true)?;

    let outcome = state
        .engine
        .put_object(&bucket, &key, meta, stream, checks)
        .await?;

    debug!(etag = %outcome.version.etag, "stored {}/{}", bucket, key);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ETAG, hval(&outcome.version.quoted_etag()));
    add_version_id_header(&mut response_headers, &outcome.version);
    Ok((StatusCode::OK, response_headers, "").into_response())
}

/// COPY object handler (plain PUT with x-amz-copy-source)
async fn copy_object(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let (src_bucket, src_key, src_version) = parse_copy_source(headers)?;

    info!("COPY {}/{} -> {}/{}", src_bucket, src_key, bucket, key);

    if src_bucket == bucket && src_key == key && !replace_directive(headers) {
        return Err(S3Error::InvalidRequest(
            "This copy request is illegal because it is trying to copy an object to itself \
             without changing the object's metadata"
                .to_string(),
        ));
    }

    let replace_meta = if replace_directive(headers) {
        Some(extract_put_metadata(headers)?)
    } else {
        None
    };

    let outcome = state
        .engine
        .copy_object(
            &src_bucket,
            &src_key,
            src_version.as_deref(),
            bucket,
            key,
            replace_meta,
        )
        .await?;

    let result = CopyObjectResult {
        etag: outcome.version.quoted_etag(),
        last_modified: outcome.version.last_modified,
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, hval("application/xml"));
    add_version_id_header(&mut response_headers, &outcome.version);
    if let Some(v) = src_version {
        response_headers.insert("x-amz-copy-source-version-id", hval(&v));
    }
    Ok((StatusCode::OK, response_headers, result.to_xml()).into_response())
}

/// DELETE object dispatch:
///   ?uploadId -> AbortMultipartUpload
///   ?tagging  -> DeleteObjectTagging
///   otherwise -> DeleteObject (delete marker semantics on versioned buckets)
#[instrument(skip(state, query))]
pub async fn delete_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    uri: Uri,
    axum::extract::Query(query): axum::extract::Query<ObjectQuery>,
) -> Result<Response, S3Error> {
    if let Some(upload_id) = &query.upload_id {
        info!(
            "AbortMultipartUpload {}/{} uploadId={}",
            bucket, key, upload_id
        );
        state.engine.abort_upload(&bucket, &key, upload_id).await?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let keys = query_keys(&uri);
    if keys.contains("tagging") {
        let row = state
            .engine
            .set_object_facet(&bucket, &key, query.version(), "tags", None)
            .await?;
        let mut response_headers = HeaderMap::new();
        add_version_id_header(&mut response_headers, &row);
        return Ok((StatusCode::NO_CONTENT, response_headers).into_response());
    }

    info!("DELETE {}/{}", bucket, key);

    let outcome = state
        .engine
        .delete_object(&bucket, &key, query.version())
        .await?;

    let mut response_headers = HeaderMap::new();
    match outcome {
        DeleteOutcome::MarkerCreated { version_id } => {
            response_headers.insert("x-amz-delete-marker", hval("true"));
            response_headers.insert("x-amz-version-id", hval(&version_id));
        }
        DeleteOutcome::VersionDeleted {
            version_id,
            was_marker,
        } => {
            if was_marker {
                response_headers.insert("x-amz-delete-marker", hval("true"));
            }
            if version_id != NULL_VERSION_ID {
                response_headers.insert("x-amz-version-id", hval(&version_id));
            }
        }
        DeleteOutcome::Noop => {}
    }

    Ok((StatusCode::NO_CONTENT, response_headers).into_response())
}

// ============================================================================
// Object facets
// ============================================================================

async fn get_object_tagging(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    version: Option<&str>,
) -> Result<Response, S3Error> {
    let (row, tags) = state
        .engine
        .object_facet(bucket, key, version, "tags")
        .await?;
    let body = tags.unwrap_or_else(xml::empty_tagging_xml);
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, hval("application/xml"));
    add_version_id_header(&mut headers, &row);
    Ok((StatusCode::OK, headers, body).into_response())
}

async fn put_object_tagging(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    version: Option<&str>,
    body: &Bytes,
) -> Result<Response, S3Error> {
    if !xml::well_formed_xml(body) {
        return Err(S3Error::MalformedXML);
    }
    let doc = String::from_utf8(body.to_vec()).map_err(|_| S3Error::MalformedXML)?;
    let row = state
        .engine
        .set_object_facet(bucket, key, version, "tags", Some(doc))
        .await?;
    let mut headers = HeaderMap::new();
    add_version_id_header(&mut headers, &row);
    Ok((StatusCode::OK, headers).into_response())
}

async fn get_object_acl(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    version: Option<&str>,
) -> Result<Response, S3Error> {
    let (row, acl) = state
        .engine
        .object_facet(bucket, key, version, "acl")
        .await?;
    // A stored XML document plays back verbatim; a canned value (or
    // nothing) renders as the owner's full-control policy.
    let body = match acl {
        Some(doc) if doc.trim_start().starts_with('<') => doc,
        _ => xml::default_acl_xml(),
    };
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, hval("application/xml"));
    add_version_id_header(&mut headers, &row);
    Ok((StatusCode::OK, headers, body).into_response())
}

async fn put_object_acl(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    version: Option<&str>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, S3Error> {
    // Header wins if present, else the XML body.
    let value = if let Some(canned) = headers.get("x-amz-acl").and_then(|v| v.to_str().ok()) {
        validate_canned_acl(canned).map_err(|e| S3Error::InvalidArgument(e.to_string()))?;
        canned.to_string()
    } else if !body.is_empty() {
        if !xml::well_formed_xml(body) {
            return Err(S3Error::MalformedXML);
        }
        String::from_utf8(body.to_vec()).map_err(|_| S3Error::MalformedXML)?
    } else {
        return Err(S3Error::InvalidRequest(
            "PutObjectAcl requires a canned ACL header or an XML body".to_string(),
        ));
    };

    let row = state
        .engine
        .set_object_facet(bucket, key, version, "acl", Some(value))
        .await?;
    let mut response_headers = HeaderMap::new();
    add_version_id_header(&mut response_headers, &row);
    Ok((StatusCode::OK, response_headers).into_response())
}

async fn get_object_retention(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    version: Option<&str>,
) -> Result<Response, S3Error> {
    let (_, retention) = state
        .engine
        .object_facet(bucket, key, version, "retention")
        .await?;
    match retention {
        Some(doc) => Ok((
            StatusCode::OK,
            [("Content-Type", "application/xml")],
            doc,
        )
            .into_response()),
        None => Err(S3Error::ConfigurationNotFound {
            code: "NoSuchObjectLockConfiguration",
        }),
    }
}

async fn put_object_retention(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    version: Option<&str>,
    body: &Bytes,
) -> Result<Response, S3Error> {
    if !xml::well_formed_xml(body) {
        return Err(S3Error::MalformedXML);
    }
    let doc = String::from_utf8(body.to_vec()).map_err(|_| S3Error::MalformedXML)?;
    state
        .engine
        .set_object_facet(bucket, key, version, "retention", Some(doc))
        .await?;
    Ok(StatusCode::OK.into_response())
}

#[derive(Debug, Deserialize)]
struct LegalHoldRequest {
    #[serde(rename = "Status")]
    status: Option<String>,
}

async fn get_object_legal_hold(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    version: Option<&str>,
) -> Result<Response, S3Error> {
    let row = state.engine.lookup(bucket, key, version).await?;
    Ok((
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        xml::legal_hold_xml(row.legal_hold),
    )
        .into_response())
}

async fn put_object_legal_hold(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    version: Option<&str>,
    body: &Bytes,
) -> Result<Response, S3Error> {
    let body_str = std::str::from_utf8(body).map_err(|_| S3Error::MalformedXML)?;
    let request: LegalHoldRequest =
        quick_xml::de::from_str(body_str).map_err(|_| S3Error::MalformedXML)?;
    let on = match request.status.as_deref() {
        Some("ON") => true,
        Some("OFF") => false,
        _ => {
            return Err(S3Error::MalformedXML);
        }
    };
    state
        .engine
        .set_legal_hold(bucket, key, version, on)
        .await?;
    Ok(StatusCode::OK.into_response())
}

/// GET /{bucket}/{key}?attributes
async fn get_object_attributes(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    version: Option<&str>,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let requested = headers
        .get("x-amz-object-attributes")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            S3Error::InvalidArgument("x-amz-object-attributes header is required".to_string())
        })?;

    let row = state.engine.lookup(bucket, key, version).await?;

    let mut attrs = ObjectAttributesXml::default();
    for attr in requested.split(',').map(str::trim) {
        match attr {
            "ETag" => attrs.etag = Some(row.etag.clone()),
            "ObjectSize" => attrs.object_size = Some(row.size),
            "StorageClass" => attrs.storage_class = true,
            // Checksum and ObjectParts are not tracked.
            _ => {}
        }
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, hval("application/xml"));
    response_headers.insert(header::LAST_MODIFIED, hval(&http_date(row.last_modified)));
    add_version_id_header(&mut response_headers, &row);
    Ok((StatusCode::OK, response_headers, attrs.to_xml()).into_response())
}

// ============================================================================
// Helpers
// ============================================================================

fn hval(s: &str) -> HeaderValue {
    HeaderValue::from_bytes(s.as_bytes()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Response headers reconstructing an object's stored metadata.
fn object_headers(version: &ObjectVersion) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ETAG, hval(&version.quoted_etag()));
    headers.insert(
        header::CONTENT_TYPE,
        hval(
            version
                .content_type
                .as_deref()
                .unwrap_or("application/octet-stream"),
        ),
    );
    headers.insert(header::LAST_MODIFIED, hval(&http_date(version.last_modified)));
    headers.insert(header::ACCEPT_RANGES, hval("bytes"));
    add_version_id_header(&mut headers, version);

    let sys = &version.system_metadata;
    if let Some(v) = &sys.cache_control {
        headers.insert(header::CACHE_CONTROL, hval(v));
    }
    if let Some(v) = &sys.content_disposition {
        headers.insert(header::CONTENT_DISPOSITION, hval(v));
    }
    if let Some(v) = &sys.content_encoding {
        headers.insert(header::CONTENT_ENCODING, hval(v));
    }
    if let Some(v) = &sys.content_language {
        headers.insert(header::CONTENT_LANGUAGE, hval(v));
    }
    if let Some(v) = &sys.expires {
        headers.insert(header::EXPIRES, hval(v));
    }

    // User metadata echoes back verbatim.
    for (k, v) in &version.user_metadata {
        let name = format!("x-amz-meta-{k}");
        if let Ok(name) = header::HeaderName::from_bytes(name.as_bytes()) {
            headers.insert(name, hval(v));
        }
    }

    headers
}

/// Version id header, omitted on buckets that were never versioned.
fn add_version_id_header(headers: &mut HeaderMap, version: &ObjectVersion) {
    if version.version_id != NULL_VERSION_ID {
        headers.insert("x-amz-version-id", hval(&version.version_id));
    }
}

/// Parse a `Range: bytes=...` header into the three supported shapes.
/// Anything else is ignored and the full object is served, matching S3.
fn parse_range(headers: &HeaderMap) -> Option<RangeRequest> {
    let raw = headers.get(header::RANGE)?.to_str().ok()?;
    let spec = raw.strip_prefix("bytes=")?.trim();
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    match (start.is_empty(), end.is_empty()) {
        // bytes=-n
        (true, false) => end.parse().ok().map(RangeRequest::Suffix),
        // bytes=a-
        (false, true) => start.parse().ok().map(RangeRequest::From),
        // bytes=a-b
        (false, false) => {
            let a = start.parse().ok()?;
            let b = end.parse().ok()?;
            Some(RangeRequest::FromTo(a, b))
        }
        (true, true) => None,
    }
}

/// Evaluate the conditional request headers against the resolved version.
/// If-Match/If-None-Match take precedence over the date forms.
fn eval_conditionals(version: &ObjectVersion, headers: &HeaderMap) -> Option<Response> {
    let etag = version.quoted_etag();

    let header_str =
        |name: header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(if_match) = header_str(header::IF_MATCH) {
        let matches = if_match
            .split(',')
            .map(str::trim)
            .any(|candidate| candidate == "*" || candidate == etag);
        if !matches {
            return Some(StatusCode::PRECONDITION_FAILED.into_response());
        }
    } else if let Some(if_unmodified) = header_str(header::IF_UNMODIFIED_SINCE) {
        if let Ok(at) = DateTime::parse_from_rfc2822(if_unmodified) {
            if version.last_modified.timestamp() > at.timestamp() {
                return Some(StatusCode::PRECONDITION_FAILED.into_response());
            }
        }
    }

    if let Some(if_none_match) = header_str(header::IF_NONE_MATCH) {
        let matches = if_none_match
            .split(',')
            .map(str::trim)
            .any(|candidate| candidate == "*" || candidate == etag);
        if matches {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            response.headers_mut().insert(header::ETAG, hval(&etag));
            return Some(response);
        }
    } else if let Some(if_modified) = header_str(header::IF_MODIFIED_SINCE) {
        if let Ok(at) = DateTime::parse_from_rfc2822(if_modified) {
            if version.last_modified.timestamp() <= at.timestamp() {
                let mut response = StatusCode::NOT_MODIFIED.into_response();
                response.headers_mut().insert(header::ETAG, hval(&etag));
                return Some(response);
            }
        }
    }

    None
}

/// Parse `x-amz-copy-source`: `/bucket/key`, optionally with
/// `?versionId=...`, URL-encoded.
pub(super) fn parse_copy_source(
    headers: &HeaderMap,
) -> Result<(String, String, Option<String>), S3Error> {
    let raw = headers
        .get("x-amz-copy-source")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| S3Error::InvalidRequest("Missing x-amz-copy-source header".to_string()))?;

    let (path, version) = match raw.split_once("?versionId=") {
        Some((p, v)) => (p, Some(v.to_string())),
        None => (raw, None),
    };

    let decoded = urlencoding::decode(path)
        .map_err(|_| S3Error::InvalidArgument("Invalid copy source encoding".to_string()))?;
    let decoded = decoded.trim_start_matches('/');

    let (bucket, key) = decoded
        .split_once('/')
        .ok_or_else(|| S3Error::InvalidArgument("Copy source must be bucket/key".to_string()))?;
    if bucket.is_empty() || key.is_empty() {
        return Err(S3Error::InvalidArgument(
            "Copy source must be bucket/key".to_string(),
        ));
    }

    Ok((bucket.to_string(), key.to_string(), version))
}

fn replace_directive(headers: &HeaderMap) -> bool {
    headers
        .get("x-amz-metadata-directive")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("REPLACE"))
}

async fn read_body(request: axum::http::Request<Body>) -> Result<Bytes, S3Error> {
    let (_, body) = request.into_parts();
    collect_bytes(body).await
}

async fn collect_bytes(body: Body) -> Result<Bytes, S3Error> {
    axum::body::to_bytes(body, 16 * 1024 * 1024)
        .await
        .map_err(|_| S3Error::InvalidRequest("Failed to read request body".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectKind;
    use std::collections::HashMap;

    fn version_fixture() -> ObjectVersion {
        ObjectVersion {
            bucket: "b".into(),
            key: "k".into(),
            version_id: NULL_VERSION_ID.into(),
            is_latest: true,
            kind: ObjectKind::Regular,
            size: 100,
            etag: "deadbeef".into(),
            content_type: Some("text/plain".into()),
            user_metadata: HashMap::from([("color".to_string(), "blue".to_string())]),
            system_metadata: Default::default(),
            tags: None,
            acl: None,
            retention: None,
            legal_hold: false,
            blob_path: Some("buckets/b/objects/aa/bb".into()),
            last_modified: Utc::now(),
        }
    }

    fn range_of(value: &str) -> Option<RangeRequest> {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, value.parse().unwrap());
        parse_range(&headers)
    }

    #[test]
    fn test_parse_range_forms() {
        assert_eq!(range_of("bytes=100-199"), Some(RangeRequest::FromTo(100, 199)));
        assert_eq!(range_of("bytes=100-"), Some(RangeRequest::From(100)));
        assert_eq!(range_of("bytes=-50"), Some(RangeRequest::Suffix(50)));
        // Multi-range and garbage are ignored, not errors.
        assert_eq!(range_of("bytes=1-2,4-5"), None);
        assert_eq!(range_of("bytes=-"), None);
        assert_eq!(range_of("items=1-2"), None);
    }

    proptest::proptest! {
        #[test]
        fn prop_parse_range_never_panics(s in "\\PC{0,40}") {
            let mut headers = HeaderMap::new();
            if let Ok(v) = s.parse::<HeaderValue>() {
                headers.insert(header::RANGE, v);
                let _ = parse_range(&headers);
            }
        }
    }

    #[test]
    fn test_object_headers_reconstruct_metadata() {
        let version = version_fixture();
        let headers = object_headers(&version);
        assert_eq!(headers[header::ETAG], "\"deadbeef\"");
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(headers["x-amz-meta-color"], "blue");
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        // Null version never announces a version id.
        assert!(!headers.contains_key("x-amz-version-id"));
    }

    #[test]
    fn test_version_id_header_for_real_versions() {
        let mut version = version_fixture();
        version.version_id = "abc123".into();
        let headers = object_headers(&version);
        assert_eq!(headers["x-amz-version-id"], "abc123");
    }

    #[test]
    fn test_if_match_mismatch_fails() {
        let version = version_fixture();
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_MATCH, "\"other\"".parse().unwrap());
        let response = eval_conditionals(&version, &headers).unwrap();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

        headers.insert(header::IF_MATCH, "\"deadbeef\"".parse().unwrap());
        assert!(eval_conditionals(&version, &headers).is_none());
    }

    #[test]
    fn test_if_none_match_hit_returns_304() {
        let version = version_fixture();
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, "\"deadbeef\"".parse().unwrap());
        let response = eval_conditionals(&version, &headers).unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[test]
    fn test_if_modified_since() {
        let version = version_fixture();
        let mut headers = HeaderMap::new();
        let later = (Utc::now() + chrono::Duration::hours(1)).to_rfc2822();
        headers.insert(header::IF_MODIFIED_SINCE, later.parse().unwrap());
        let response = eval_conditionals(&version, &headers).unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

        let earlier = (Utc::now() - chrono::Duration::hours(1)).to_rfc2822();
        headers.insert(header::IF_MODIFIED_SINCE, earlier.parse().unwrap());
        assert!(eval_conditionals(&version, &headers).is_none());
    }

    #[test]
    fn test_parse_copy_source() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-copy-source", "/src-bucket/a/b.txt".parse().unwrap());
        let (b, k, v) = parse_copy_source(&headers).unwrap();
        assert_eq!(b, "src-bucket");
        assert_eq!(k, "a/b.txt");
        assert_eq!(v, None);

        headers.insert(
            "x-amz-copy-source",
            "src-bucket/my%20file.txt?versionId=v7".parse().unwrap(),
        );
        let (b, k, v) = parse_copy_source(&headers).unwrap();
        assert_eq!(b, "src-bucket");
        assert_eq!(k, "my file.txt");
        assert_eq!(v.as_deref(), Some("v7"));

        headers.insert("x-amz-copy-source", "just-a-bucket".parse().unwrap());
        assert!(parse_copy_source(&headers).is_err());
    }
}
