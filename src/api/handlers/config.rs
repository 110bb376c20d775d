//! Generic pass-through configuration facets
//!
//! S3 exposes dozens of bucket sub-resources; this server stores them as
//! opaque documents keyed by `(bucket, facet)` and plays them back
//! verbatim. Only well-formedness is validated on PUT. Versioning (which
//! changes write behavior), CORS (which answers preflights) and canned
//! ACL values are the only payloads anything ever parses.

use super::AppState;
use crate::api::errors::S3Error;
use crate::api::xml;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::debug;

/// How a PUT body is validated before storage.
#[derive(Debug, Clone, Copy)]
pub enum Validation {
    Xml,
    Json,
}

/// What a GET returns when nothing was stored.
#[derive(Debug, Clone, Copy)]
pub enum Missing {
    /// Fixed S3 error code (NoSuchTagSet, NoSuchBucketPolicy, ...).
    Error(&'static str),
    /// Default document synthesized on the fly.
    DefaultAcl,
}

/// One pass-through facet: its query key, storage name, content type,
/// validation, and missing-value behavior.
pub struct FacetSpec {
    pub query: &'static str,
    pub name: &'static str,
    pub content_type: &'static str,
    pub validation: Validation,
    pub missing: Missing,
}

/// Every bucket sub-resource served by the generic pair of handlers.
pub const BUCKET_FACETS: &[FacetSpec] = &[
    FacetSpec {
        query: "tagging",
        name: "tagging",
        content_type: "application/xml",
        validation: Validation::Xml,
        missing: Missing::Error("NoSuchTagSet"),
    },
    FacetSpec {
        query: "cors",
        name: "cors",
        content_type: "application/xml",
        validation: Validation::Xml,
        missing: Missing::Error("NoSuchCORSConfiguration"),
    },
    FacetSpec {
        query: "policy",
        name: "policy",
        content_type: "application/json",
        validation: Validation::Json,
        missing: Missing::Error("NoSuchBucketPolicy"),
    },
    FacetSpec {
        query: "lifecycle",
        name: "lifecycle",
        content_type: "application/xml",
        validation: Validation::Xml,
        missing: Missing::Error("NoSuchLifecycleConfiguration"),
    },
    FacetSpec {
        query: "encryption",
        name: "encryption",
        content_type: "application/xml",
        validation: Validation::Xml,
        missing: Missing::Error("ServerSideEncryptionConfigurationNotFoundError"),
    },
    FacetSpec {
        query: "website",
        name: "website",
        content_type: "application/xml",
        validation: Validation::Xml,
        missing: Missing::Error("NoSuchWebsiteConfiguration"),
    },
    FacetSpec {
        query: "object-lock",
        name: "object-lock",
        content_type: "application/xml",
        validation: Validation::Xml,
        missing: Missing::Error("ObjectLockConfigurationNotFoundError"),
    },
    FacetSpec {
        query: "acl",
        name: "acl",
        content_type: "application/xml",
        validation: Validation::Xml,
        missing: Missing::DefaultAcl,
    },
];

/// Find the facet a request's query keys select, if any.
pub fn facet_for_query<'a>(
    specs: &'a [FacetSpec],
    keys: &std::collections::HashSet<String>,
) -> Option<&'a FacetSpec> {
    specs.iter().find(|spec| keys.contains(spec.query))
}

pub async fn get_bucket_facet(
    state: &Arc<AppState>,
    bucket: &str,
    spec: &FacetSpec,
) -> Result<Response, S3Error> {
    let stored = state.engine.get_bucket_config(bucket, spec.name).await?;
    match stored {
        Some(body) => Ok((
            StatusCode::OK,
            [("Content-Type", spec.content_type)],
            body,
        )
            .into_response()),
        None => match spec.missing {
            Missing::Error(code) => Err(S3Error::ConfigurationNotFound { code }),
            Missing::DefaultAcl => Ok((
                StatusCode::OK,
                [("Content-Type", "application/xml")],
                xml::default_acl_xml(),
            )
                .into_response()),
        },
    }
}

pub async fn put_bucket_facet(
    state: &Arc<AppState>,
    bucket: &str,
    spec: &FacetSpec,
    body: &[u8],
) -> Result<Response, S3Error> {
    match spec.validation {
        Validation::Xml => {
            if !xml::well_formed_xml(body) {
                return Err(S3Error::MalformedXML);
            }
        }
        Validation::Json => {
            if serde_json::from_slice::<serde_json::Value>(body).is_err() {
                return Err(S3Error::InvalidArgument(
                    "Policies must be valid JSON".to_string(),
                ));
            }
        }
    }

    state
        .engine
        .put_bucket_config(bucket, spec.name, body.to_vec())
        .await?;
    debug!(bucket, facet = spec.name, bytes = body.len(), "bucket configuration stored");
    Ok(StatusCode::OK.into_response())
}

pub async fn delete_bucket_facet(
    state: &Arc<AppState>,
    bucket: &str,
    spec: &FacetSpec,
) -> Result<Response, S3Error> {
    state.engine.delete_bucket_config(bucket, spec.name).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facet_lookup_by_query_key() {
        let mut keys = std::collections::HashSet::new();
        keys.insert("lifecycle".to_string());
        keys.insert("prefix".to_string());
        let spec = facet_for_query(BUCKET_FACETS, &keys).unwrap();
        assert_eq!(spec.name, "lifecycle");

        keys.clear();
        keys.insert("list-type".to_string());
        assert!(facet_for_query(BUCKET_FACETS, &keys).is_none());
    }

    #[test]
    fn test_every_facet_has_distinct_query_key() {
        let mut seen = std::collections::HashSet::new();
        for spec in BUCKET_FACETS {
            assert!(seen.insert(spec.query), "duplicate facet {}", spec.query);
        }
    }
}
