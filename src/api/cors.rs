//! CORS rule parsing and preflight matching
//!
//! The stored bucket CORS document is an opaque pass-through blob; this
//! module parses it on demand when an OPTIONS preflight (or a
//! cross-origin request) needs a decision. No bucket CORS document means
//! no CORS headers; preflights still answer 200.

use serde::Deserialize;

/// A single CORS configuration rule for a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CorsRule {
    #[serde(rename = "AllowedOrigin", default)]
    pub allowed_origins: Vec<String>,
    #[serde(rename = "AllowedMethod", default)]
    pub allowed_methods: Vec<String>,
    #[serde(rename = "AllowedHeader", default)]
    pub allowed_headers: Vec<String>,
    #[serde(rename = "ExposeHeader", default)]
    pub expose_headers: Vec<String>,
    #[serde(rename = "MaxAgeSeconds")]
    pub max_age_seconds: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfiguration {
    #[serde(rename = "CORSRule", default)]
    pub rules: Vec<CorsRule>,
}

impl CorsConfiguration {
    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }
}

/// The values a matched rule contributes to the response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsMatch {
    pub allowed_origin: String,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub max_age_seconds: Option<u32>,
}

/// Match a preflight `(origin, method)` against the configuration; the
/// first matching rule wins.
pub fn match_rules(config: &CorsConfiguration, origin: &str, method: &str) -> Option<CorsMatch> {
    for rule in &config.rules {
        if !rule.allowed_origins.iter().any(|p| match_origin(p, origin)) {
            continue;
        }
        if !rule
            .allowed_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
        {
            continue;
        }
        let allowed_origin = if rule.allowed_origins.iter().any(|o| o == "*") {
            "*".to_string()
        } else {
            origin.to_string()
        };
        return Some(CorsMatch {
            allowed_origin,
            allowed_methods: rule.allowed_methods.clone(),
            allowed_headers: rule.allowed_headers.clone(),
            expose_headers: rule.expose_headers.clone(),
            max_age_seconds: rule.max_age_seconds,
        });
    }
    None
}

/// Origin patterns are exact strings, `*`, or contain one `*` wildcard
/// (e.g. `https://*.example.com`).
fn match_origin(pattern: &str, origin: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.split_once('*') {
        Some((head, tail)) => {
            origin.len() >= head.len() + tail.len()
                && origin.starts_with(head)
                && origin.ends_with(tail)
        }
        None => pattern == origin,
    }
}
