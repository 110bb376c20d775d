//! S3 XML response builders and request parsers
//!
//! Response roots and namespaces follow S3's published shapes exactly;
//! AWS SDKs parse them strictly. Builders are hand-written push-string
//! writers; request bodies are parsed with quick-xml's serde support.

use crate::types::{ObjectSummary, STORAGE_CLASS};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Owner reported for every bucket and object; a single-credential server
/// has exactly one.
pub const OWNER_ID: &str = "karst";
pub const OWNER_DISPLAY_NAME: &str = "karst";

const XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Response timestamp format; the strict ISO 8601 form S3 SDKs expect.
pub fn fmt_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Escape special XML characters
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Cheap well-formedness check for pass-through configuration documents.
pub fn well_formed_xml(body: &[u8]) -> bool {
    let mut reader = quick_xml::Reader::from_reader(body);
    let mut buf = Vec::new();
    let mut saw_element = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Eof) => return saw_element,
            Ok(quick_xml::events::Event::Start(_) | quick_xml::events::Event::Empty(_)) => {
                saw_element = true;
            }
            Ok(_) => {}
            Err(_) => return false,
        }
        buf.clear();
    }
}

fn owner_xml(indent: &str) -> String {
    format!(
        "{indent}<Owner>\n{indent}  <ID>{OWNER_ID}</ID>\n{indent}  <DisplayName>{OWNER_DISPLAY_NAME}</DisplayName>\n{indent}</Owner>\n"
    )
}

// ============================================================================
// ListBuckets
// ============================================================================

/// Bucket info for ListBuckets
#[derive(Debug, Clone)]
pub struct BucketInfo {
    pub name: String,
    pub creation_date: DateTime<Utc>,
}

/// ListBuckets response
#[derive(Debug, Clone)]
pub struct ListBucketsResult {
    pub buckets: Vec<BucketInfo>,
}

impl ListBucketsResult {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<ListAllMyBucketsResult xmlns="{XMLNS}">"#));
        xml.push('\n');

        xml.push_str(&owner_xml("  "));

        xml.push_str("  <Buckets>\n");
        for bucket in &self.buckets {
            xml.push_str("    <Bucket>\n");
            xml.push_str(&format!(
                "      <Name>{}</Name>\n",
                escape_xml(&bucket.name)
            ));
            xml.push_str(&format!(
                "      <CreationDate>{}</CreationDate>\n",
                fmt_timestamp(bucket.creation_date)
            ));
            xml.push_str("    </Bucket>\n");
        }
        xml.push_str("  </Buckets>\n");

        xml.push_str("</ListAllMyBucketsResult>");
        xml
    }
}

// ============================================================================
// ListObjects v1 / v2
// ============================================================================

/// ListObjects v1/v2 response
#[derive(Debug, Clone)]
pub struct ListBucketResult {
    pub name: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: usize,
    pub is_truncated: bool,
    pub contents: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    /// v2 pagination
    pub continuation_token: Option<String>,
    pub next_continuation_token: Option<String>,
    pub start_after: Option<String>,
    /// v1 pagination
    pub marker: Option<String>,
    pub next_marker: Option<String>,
    /// Whether to URL-encode keys/prefixes in the XML response
    pub encoding_type: Option<String>,
    /// v1 vs v2 flag
    pub is_v1: bool,
}

impl ListBucketResult {
    /// Encode a key/prefix value: URL-encode if encoding_type is "url",
    /// otherwise XML-escape.
    fn encode_value(&self, s: &str) -> String {
        if self.encoding_type.as_deref() == Some("url") {
            urlencoding::encode(s).into_owned()
        } else {
            escape_xml(s)
        }
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<ListBucketResult xmlns="{XMLNS}">"#));
        xml.push('\n');

        xml.push_str(&format!("  <Name>{}</Name>\n", escape_xml(&self.name)));
        xml.push_str(&format!(
            "  <Prefix>{}</Prefix>\n",
            self.encode_value(&self.prefix)
        ));
        if let Some(ref delim) = self.delimiter {
            xml.push_str(&format!(
                "  <Delimiter>{}</Delimiter>\n",
                self.encode_value(delim)
            ));
        }
        if let Some(ref enc) = self.encoding_type {
            xml.push_str(&format!(
                "  <EncodingType>{}</EncodingType>\n",
                escape_xml(enc)
            ));
        }
        xml.push_str(&format!("  <MaxKeys>{}</MaxKeys>\n", self.max_keys));

        if self.is_v1 {
            // v1: <Marker>, <NextMarker>, no <KeyCount>
            xml.push_str(&format!(
                "  <Marker>{}</Marker>\n",
                self.encode_value(self.marker.as_deref().unwrap_or(""))
            ));
            xml.push_str(&format!(
                "  <IsTruncated>{}</IsTruncated>\n",
                self.is_truncated
            ));
            if self.is_truncated {
                if let Some(ref nm) = self.next_marker {
                    xml.push_str(&format!(
                        "  <NextMarker>{}</NextMarker>\n",
                        self.encode_value(nm)
                    ));
                }
            }
        } else {
            // v2: <KeyCount>, <ContinuationToken>, <NextContinuationToken>
            let key_count = self.contents.len() + self.common_prefixes.len();
            xml.push_str(&format!("  <KeyCount>{key_count}</KeyCount>\n"));
            xml.push_str(&format!(
                "  <IsTruncated>{}</IsTruncated>\n",
                self.is_truncated
            ));
            if let Some(ref token) = self.continuation_token {
                xml.push_str(&format!(
                    "  <ContinuationToken>{}</ContinuationToken>\n",
                    escape_xml(token)
                ));
            }
            if let Some(ref token) = self.next_continuation_token {
                xml.push_str(&format!(
                    "  <NextContinuationToken>{}</NextContinuationToken>\n",
                    escape_xml(token)
                ));
            }
            if let Some(ref start) = self.start_after {
                xml.push_str(&format!(
                    "  <StartAfter>{}</StartAfter>\n",
                    self.encode_value(start)
                ));
            }
        }

        for obj in &self.contents {
            xml.push_str("  <Contents>\n");
            xml.push_str(&format!("    <Key>{}</Key>\n", self.encode_value(&obj.key)));
            xml.push_str(&format!(
                "    <LastModified>{}</LastModified>\n",
                fmt_timestamp(obj.last_modified)
            ));
            xml.push_str(&format!(
                "    <ETag>{}</ETag>\n",
                escape_xml(&format!("\"{}\"", obj.etag))
            ));
            xml.push_str(&format!("    <Size>{}</Size>\n", obj.size));
            xml.push_str(&format!(
                "    <StorageClass>{STORAGE_CLASS}</StorageClass>\n"
            ));
            xml.push_str("  </Contents>\n");
        }

        for cp in &self.common_prefixes {
            xml.push_str("  <CommonPrefixes>\n");
            xml.push_str(&format!("    <Prefix>{}</Prefix>\n", self.encode_value(cp)));
            xml.push_str("  </CommonPrefixes>\n");
        }

        xml.push_str("</ListBucketResult>");
        xml
    }
}

// ============================================================================
// ListObjectVersions
// ============================================================================

/// One entry of a ListVersionsResult, in walk order.
#[derive(Debug, Clone)]
pub enum VersionXmlEntry {
    Version(ObjectSummary),
    DeleteMarker(ObjectSummary),
    CommonPrefix(String),
}

#[derive(Debug, Clone)]
pub struct ListVersionsXml {
    pub name: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub key_marker: String,
    pub version_id_marker: String,
    pub next_key_marker: Option<String>,
    pub next_version_id_marker: Option<String>,
    pub max_keys: usize,
    pub is_truncated: bool,
    pub entries: Vec<VersionXmlEntry>,
}

impl ListVersionsXml {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<ListVersionsResult xmlns="{XMLNS}">"#));
        xml.push('\n');

        xml.push_str(&format!("  <Name>{}</Name>\n", escape_xml(&self.name)));
        xml.push_str(&format!(
            "  <Prefix>{}</Prefix>\n",
            escape_xml(&self.prefix)
        ));
        xml.push_str(&format!(
            "  <KeyMarker>{}</KeyMarker>\n",
            escape_xml(&self.key_marker)
        ));
        xml.push_str(&format!(
            "  <VersionIdMarker>{}</VersionIdMarker>\n",
            escape_xml(&self.version_id_marker)
        ));
        if let Some(ref nm) = self.next_key_marker {
            xml.push_str(&format!(
                "  <NextKeyMarker>{}</NextKeyMarker>\n",
                escape_xml(nm)
            ));
        }
        if let Some(ref nm) = self.next_version_id_marker {
            xml.push_str(&format!(
                "  <NextVersionIdMarker>{}</NextVersionIdMarker>\n",
                escape_xml(nm)
            ));
        }
        if let Some(ref delim) = self.delimiter {
            xml.push_str(&format!(
                "  <Delimiter>{}</Delimiter>\n",
                escape_xml(delim)
            ));
        }
        xml.push_str(&format!("  <MaxKeys>{}</MaxKeys>\n", self.max_keys));
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));

        for entry in &self.entries {
            match entry {
                VersionXmlEntry::Version(v) => {
                    xml.push_str("  <Version>\n");
                    xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&v.key)));
                    xml.push_str(&format!(
                        "    <VersionId>{}</VersionId>\n",
                        escape_xml(&v.version_id)
                    ));
                    xml.push_str(&format!("    <IsLatest>{}</IsLatest>\n", v.is_latest));
                    xml.push_str(&format!(
                        "    <LastModified>{}</LastModified>\n",
                        fmt_timestamp(v.last_modified)
                    ));
                    xml.push_str(&format!(
                        "    <ETag>{}</ETag>\n",
                        escape_xml(&format!("\"{}\"", v.etag))
                    ));
                    xml.push_str(&format!("    <Size>{}</Size>\n", v.size));
                    xml.push_str(&format!(
                        "    <StorageClass>{STORAGE_CLASS}</StorageClass>\n"
                    ));
                    xml.push_str(&owner_xml("    "));
                    xml.push_str("  </Version>\n");
                }
                VersionXmlEntry::DeleteMarker(m) => {
                    xml.push_str("  <DeleteMarker>\n");
                    xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&m.key)));
                    xml.push_str(&format!(
                        "    <VersionId>{}</VersionId>\n",
                        escape_xml(&m.version_id)
                    ));
                    xml.push_str(&format!("    <IsLatest>{}</IsLatest>\n", m.is_latest));
                    xml.push_str(&format!(
                        "    <LastModified>{}</LastModified>\n",
                        fmt_timestamp(m.last_modified)
                    ));
                    xml.push_str(&owner_xml("    "));
                    xml.push_str("  </DeleteMarker>\n");
                }
                VersionXmlEntry::CommonPrefix(p) => {
                    xml.push_str("  <CommonPrefixes>\n");
                    xml.push_str(&format!("    <Prefix>{}</Prefix>\n", escape_xml(p)));
                    xml.push_str("  </CommonPrefixes>\n");
                }
            }
        }

        xml.push_str("</ListVersionsResult>");
        xml
    }
}

// ============================================================================
// Bucket configuration documents
// ============================================================================

/// GetBucketVersioning response; Status absent while never versioned.
pub fn versioning_configuration_xml(status: Option<&str>) -> String {
    match status {
        Some(status) => format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<VersioningConfiguration xmlns="{XMLNS}">
  <Status>{status}</Status>
</VersioningConfiguration>"#
        ),
        None => format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<VersioningConfiguration xmlns="{XMLNS}"/>"#
        ),
    }
}

/// GetBucketLocation response. us-east-1 is represented as an empty
/// LocationConstraint, S3's historical quirk.
pub fn location_constraint_xml(region: &str) -> String {
    if region == "us-east-1" {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<LocationConstraint xmlns="{XMLNS}"/>"#
        )
    } else {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<LocationConstraint xmlns="{XMLNS}">{}</LocationConstraint>"#,
            escape_xml(region)
        )
    }
}

/// Default private ACL document returned when none was stored.
pub fn default_acl_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<AccessControlPolicy xmlns="{XMLNS}">
  <Owner>
    <ID>{OWNER_ID}</ID>
    <DisplayName>{OWNER_DISPLAY_NAME}</DisplayName>
  </Owner>
  <AccessControlList>
    <Grant>
      <Grantee xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="CanonicalUser">
        <ID>{OWNER_ID}</ID>
        <DisplayName>{OWNER_DISPLAY_NAME}</DisplayName>
      </Grantee>
      <Permission>FULL_CONTROL</Permission>
    </Grant>
  </AccessControlList>
</AccessControlPolicy>"#
    )
}

/// Tagging document with no tags.
pub fn empty_tagging_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Tagging xmlns="{XMLNS}">
  <TagSet/>
</Tagging>"#
    )
}

/// Build a Tagging document from the URL-encoded `x-amz-tagging` header
/// (`k1=v1&k2=v2`), so header-tagged and body-tagged objects read back
/// the same way.
pub fn tagging_from_header(header: &str) -> Option<String> {
    let mut tags = Vec::new();
    for pair in header.split('&').filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once('=')?;
        let k = urlencoding::decode(k).ok()?;
        let v = urlencoding::decode(v).ok()?;
        tags.push((k.into_owned(), v.into_owned()));
    }
    if tags.is_empty() {
        return None;
    }

    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(&format!(r#"<Tagging xmlns="{XMLNS}">"#));
    xml.push_str("\n  <TagSet>\n");
    for (k, v) in &tags {
        xml.push_str(&format!(
            "    <Tag><Key>{}</Key><Value>{}</Value></Tag>\n",
            escape_xml(k),
            escape_xml(v)
        ));
    }
    xml.push_str("  </TagSet>\n</Tagging>");
    Some(xml)
}

/// Object legal hold document.
pub fn legal_hold_xml(on: bool) -> String {
    let status = if on { "ON" } else { "OFF" };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<LegalHold xmlns="{XMLNS}">
  <Status>{status}</Status>
</LegalHold>"#
    )
}

// ============================================================================
// DeleteObjects Request/Response
// ============================================================================

/// Delete request object
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteObjectIdentifier {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "VersionId")]
    pub version_id: Option<String>,
}

/// Delete request body
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    #[serde(rename = "Quiet")]
    pub quiet: Option<bool>,
    #[serde(rename = "Object", default)]
    pub objects: Vec<DeleteObjectIdentifier>,
}

impl DeleteRequest {
    /// Parse from XML body
    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }
}

/// Result of deleting a single object
#[derive(Debug, Clone)]
pub struct DeletedObject {
    pub key: String,
    pub version_id: Option<String>,
    /// True when this delete created or removed a delete marker.
    pub delete_marker: bool,
    pub delete_marker_version_id: Option<String>,
}

/// Error deleting a single object
#[derive(Debug, Clone)]
pub struct DeleteError {
    pub key: String,
    pub version_id: Option<String>,
    pub code: String,
    pub message: String,
}

/// DeleteObjects response
#[derive(Debug, Clone, Default)]
pub struct DeleteResult {
    pub deleted: Vec<DeletedObject>,
    pub errors: Vec<DeleteError>,
}

impl DeleteResult {
    pub fn to_xml(&self, quiet: bool) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<DeleteResult xmlns="{XMLNS}">"#));
        xml.push('\n');

        // Only include Deleted elements if not quiet
        if !quiet {
            for deleted in &self.deleted {
                xml.push_str("  <Deleted>\n");
                xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&deleted.key)));
                if let Some(ref vid) = deleted.version_id {
                    xml.push_str(&format!("    <VersionId>{}</VersionId>\n", escape_xml(vid)));
                }
                if deleted.delete_marker {
                    xml.push_str("    <DeleteMarker>true</DeleteMarker>\n");
                    if let Some(ref vid) = deleted.delete_marker_version_id {
                        xml.push_str(&format!(
                            "    <DeleteMarkerVersionId>{}</DeleteMarkerVersionId>\n",
                            escape_xml(vid)
                        ));
                    }
                }
                xml.push_str("  </Deleted>\n");
            }
        }

        // Always include errors
        for error in &self.errors {
            xml.push_str("  <Error>\n");
            xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&error.key)));
            if let Some(ref vid) = error.version_id {
                xml.push_str(&format!("    <VersionId>{}</VersionId>\n", escape_xml(vid)));
            }
            xml.push_str(&format!("    <Code>{}</Code>\n", escape_xml(&error.code)));
            xml.push_str(&format!(
                "    <Message>{}</Message>\n",
                escape_xml(&error.message)
            ));
            xml.push_str("  </Error>\n");
        }

        xml.push_str("</DeleteResult>");
        xml
    }
}

// ============================================================================
// CopyObject / UploadPartCopy Responses
// ============================================================================

/// CopyObject response
#[derive(Debug, Clone)]
pub struct CopyObjectResult {
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl CopyObjectResult {
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<CopyObjectResult xmlns="{XMLNS}">
  <ETag>{}</ETag>
  <LastModified>{}</LastModified>
</CopyObjectResult>"#,
            escape_xml(&self.etag),
            fmt_timestamp(self.last_modified)
        )
    }

    pub fn to_part_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<CopyPartResult xmlns="{XMLNS}">
  <ETag>{}</ETag>
  <LastModified>{}</LastModified>
</CopyPartResult>"#,
            escape_xml(&self.etag),
            fmt_timestamp(self.last_modified)
        )
    }
}

// ============================================================================
// Multipart Upload Request/Response
// ============================================================================

/// Part in a CompleteMultipartUpload request
#[derive(Debug, Clone, Deserialize)]
pub struct CompletePartXml {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// CompleteMultipartUpload request body
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteMultipartUploadRequest {
    #[serde(rename = "Part", default)]
    pub parts: Vec<CompletePartXml>,
}

impl CompleteMultipartUploadRequest {
    /// Parse from XML body
    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }
}

/// PutBucketVersioning request body
#[derive(Debug, Clone, Deserialize)]
pub struct VersioningConfigurationRequest {
    #[serde(rename = "Status")]
    pub status: Option<String>,
}

impl VersioningConfigurationRequest {
    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }
}

/// InitiateMultipartUpload response
#[derive(Debug, Clone)]
pub struct InitiateMultipartUploadResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

impl InitiateMultipartUploadResult {
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="{XMLNS}">
  <Bucket>{}</Bucket>
  <Key>{}</Key>
  <UploadId>{}</UploadId>
</InitiateMultipartUploadResult>"#,
            escape_xml(&self.bucket),
            escape_xml(&self.key),
            escape_xml(&self.upload_id),
        )
    }
}

/// CompleteMultipartUpload response
#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadResult {
    pub location: String,
    pub bucket: String,
    pub key: String,
    pub etag: String,
}

impl CompleteMultipartUploadResult {
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<CompleteMultipartUploadResult xmlns="{XMLNS}">
  <Location>{}</Location>
  <Bucket>{}</Bucket>
  <Key>{}</Key>
  <ETag>{}</ETag>
</CompleteMultipartUploadResult>"#,
            escape_xml(&self.location),
            escape_xml(&self.bucket),
            escape_xml(&self.key),
            escape_xml(&self.etag),
        )
    }
}

/// Part info for ListParts response
#[derive(Debug, Clone)]
pub struct PartInfoXml {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// ListParts response
#[derive(Debug, Clone)]
pub struct ListPartsXml {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number_marker: u32,
    pub next_part_number_marker: Option<u32>,
    pub parts: Vec<PartInfoXml>,
    pub max_parts: usize,
    pub is_truncated: bool,
}

impl ListPartsXml {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<ListPartsResult xmlns="{XMLNS}">"#));
        xml.push('\n');
        xml.push_str(&format!(
            "  <Bucket>{}</Bucket>\n",
            escape_xml(&self.bucket)
        ));
        xml.push_str(&format!("  <Key>{}</Key>\n", escape_xml(&self.key)));
        xml.push_str(&format!(
            "  <UploadId>{}</UploadId>\n",
            escape_xml(&self.upload_id)
        ));
        xml.push_str(&format!(
            "  <PartNumberMarker>{}</PartNumberMarker>\n",
            self.part_number_marker
        ));
        if let Some(next) = self.next_part_number_marker {
            xml.push_str(&format!(
                "  <NextPartNumberMarker>{next}</NextPartNumberMarker>\n"
            ));
        }
        xml.push_str(&format!("  <MaxParts>{}</MaxParts>\n", self.max_parts));
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));
        xml.push_str(&format!(
            "  <StorageClass>{STORAGE_CLASS}</StorageClass>\n"
        ));

        for part in &self.parts {
            xml.push_str("  <Part>\n");
            xml.push_str(&format!(
                "    <PartNumber>{}</PartNumber>\n",
                part.part_number
            ));
            xml.push_str(&format!("    <ETag>{}</ETag>\n", escape_xml(&part.etag)));
            xml.push_str(&format!("    <Size>{}</Size>\n", part.size));
            xml.push_str(&format!(
                "    <LastModified>{}</LastModified>\n",
                fmt_timestamp(part.last_modified)
            ));
            xml.push_str("  </Part>\n");
        }

        xml.push_str("</ListPartsResult>");
        xml
    }
}

/// Upload info for ListMultipartUploads response
#[derive(Debug, Clone)]
pub struct UploadInfoXml {
    pub key: String,
    pub upload_id: String,
    pub initiated: DateTime<Utc>,
}

/// ListMultipartUploads response
#[derive(Debug, Clone)]
pub struct ListMultipartUploadsXml {
    pub bucket: String,
    pub prefix: String,
    pub key_marker: String,
    pub upload_id_marker: String,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
    pub uploads: Vec<UploadInfoXml>,
    pub max_uploads: usize,
    pub is_truncated: bool,
}

impl ListMultipartUploadsXml {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<ListMultipartUploadsResult xmlns="{XMLNS}">"#));
        xml.push('\n');
        xml.push_str(&format!(
            "  <Bucket>{}</Bucket>\n",
            escape_xml(&self.bucket)
        ));
        xml.push_str(&format!(
            "  <KeyMarker>{}</KeyMarker>\n",
            escape_xml(&self.key_marker)
        ));
        xml.push_str(&format!(
            "  <UploadIdMarker>{}</UploadIdMarker>\n",
            escape_xml(&self.upload_id_marker)
        ));
        if let Some(ref nm) = self.next_key_marker {
            xml.push_str(&format!(
                "  <NextKeyMarker>{}</NextKeyMarker>\n",
                escape_xml(nm)
            ));
        }
        if let Some(ref nm) = self.next_upload_id_marker {
            xml.push_str(&format!(
                "  <NextUploadIdMarker>{}</NextUploadIdMarker>\n",
                escape_xml(nm)
            ));
        }
        if !self.prefix.is_empty() {
            xml.push_str(&format!(
                "  <Prefix>{}</Prefix>\n",
                escape_xml(&self.prefix)
            ));
        }
        xml.push_str(&format!(
            "  <MaxUploads>{}</MaxUploads>\n",
            self.max_uploads
        ));
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));

        for upload in &self.uploads {
            xml.push_str("  <Upload>\n");
            xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&upload.key)));
            xml.push_str(&format!(
                "    <UploadId>{}</UploadId>\n",
                escape_xml(&upload.upload_id)
            ));
            xml.push_str(&format!(
                "    <StorageClass>{STORAGE_CLASS}</StorageClass>\n"
            ));
            xml.push_str(&format!(
                "    <Initiated>{}</Initiated>\n",
                fmt_timestamp(upload.initiated)
            ));
            xml.push_str("  </Upload>\n");
        }

        xml.push_str("</ListMultipartUploadsResult>");
        xml
    }
}

// ============================================================================
// GetObjectAttributes
// ============================================================================

/// GetObjectAttributes response; only requested attributes are present.
#[derive(Debug, Clone, Default)]
pub struct ObjectAttributesXml {
    pub etag: Option<String>,
    pub object_size: Option<u64>,
    pub storage_class: bool,
}

impl ObjectAttributesXml {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<GetObjectAttributesResponse xmlns="{XMLNS}">"#));
        xml.push('\n');
        if let Some(ref etag) = self.etag {
            // ETag is unquoted in this response, unlike everywhere else.
            xml.push_str(&format!("  <ETag>{}</ETag>\n", escape_xml(etag)));
        }
        if self.storage_class {
            xml.push_str(&format!(
                "  <StorageClass>{STORAGE_CLASS}</StorageClass>\n"
            ));
        }
        if let Some(size) = self.object_size {
            xml.push_str(&format!("  <ObjectSize>{size}</ObjectSize>\n"));
        }
        xml.push_str("</GetObjectAttributesResponse>");
        xml
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectKind;

    fn summary(key: &str) -> ObjectSummary {
        ObjectSummary {
            key: key.to_string(),
            version_id: "null".to_string(),
            is_latest: true,
            kind: ObjectKind::Regular,
            size: 42,
            etag: "deadbeef".to_string(),
            last_modified: Utc::now(),
        }
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b>c"), "a&lt;b&gt;c");
        assert_eq!(escape_xml("a&b"), "a&amp;b");
    }

    #[test]
    fn test_well_formed_xml() {
        assert!(well_formed_xml(b"<Tagging><TagSet/></Tagging>"));
        assert!(!well_formed_xml(b"<Tagging><TagSet></Tagging>"));
        assert!(!well_formed_xml(b"not xml at all"));
    }

    #[test]
    fn test_list_bucket_result_v2_shape() {
        let result = ListBucketResult {
            name: "b1".to_string(),
            prefix: String::new(),
            delimiter: Some("/".to_string()),
            max_keys: 1000,
            is_truncated: false,
            contents: vec![summary("a.txt")],
            common_prefixes: vec!["dir/".to_string()],
            continuation_token: None,
            next_continuation_token: None,
            start_after: None,
            marker: None,
            next_marker: None,
            encoding_type: None,
            is_v1: false,
        };
        let xml = result.to_xml();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(r#"<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#));
        assert!(xml.contains("<KeyCount>2</KeyCount>"));
        assert!(xml.contains("<Key>a.txt</Key>"));
        assert!(xml.contains("<ETag>&quot;deadbeef&quot;</ETag>"));
        assert!(xml.contains("<Prefix>dir/</Prefix>"));
        assert!(!xml.contains("<Marker>"));
    }

    #[test]
    fn test_list_bucket_result_v1_markers() {
        let result = ListBucketResult {
            name: "b1".to_string(),
            prefix: String::new(),
            delimiter: None,
            max_keys: 2,
            is_truncated: true,
            contents: vec![summary("a"), summary("b")],
            common_prefixes: vec![],
            continuation_token: None,
            next_continuation_token: None,
            start_after: None,
            marker: Some(String::new()),
            next_marker: Some("b".to_string()),
            encoding_type: None,
            is_v1: true,
        };
        let xml = result.to_xml();
        assert!(xml.contains("<Marker></Marker>"));
        assert!(xml.contains("<NextMarker>b</NextMarker>"));
        assert!(!xml.contains("<KeyCount>"));
    }

    #[test]
    fn test_url_encoding_type() {
        let result = ListBucketResult {
            name: "b1".to_string(),
            prefix: "sp ace/".to_string(),
            delimiter: None,
            max_keys: 1000,
            is_truncated: false,
            contents: vec![summary("sp ace/file")],
            common_prefixes: vec![],
            continuation_token: None,
            next_continuation_token: None,
            start_after: None,
            marker: None,
            next_marker: None,
            encoding_type: Some("url".to_string()),
            is_v1: false,
        };
        let xml = result.to_xml();
        assert!(xml.contains("<Key>sp%20ace%2Ffile</Key>"));
    }

    #[test]
    fn test_list_versions_interleaves_markers() {
        let mut marker = summary("k");
        marker.kind = ObjectKind::DeleteMarker;
        marker.version_id = "v3".to_string();
        let xml = ListVersionsXml {
            name: "b1".to_string(),
            prefix: String::new(),
            delimiter: None,
            key_marker: String::new(),
            version_id_marker: String::new(),
            next_key_marker: None,
            next_version_id_marker: None,
            max_keys: 1000,
            is_truncated: false,
            entries: vec![
                VersionXmlEntry::DeleteMarker(marker),
                VersionXmlEntry::Version(summary("k")),
            ],
        }
        .to_xml();
        let dm_pos = xml.find("<DeleteMarker>").unwrap();
        let v_pos = xml.find("<Version>").unwrap();
        assert!(dm_pos < v_pos, "walk order must be preserved");
        assert!(xml.contains("<ListVersionsResult"));
    }

    #[test]
    fn test_delete_request_from_xml() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<Delete>
  <Object><Key>file1.txt</Key></Object>
  <Object><Key>file2.txt</Key><VersionId>v2</VersionId></Object>
</Delete>"#;
        let req = DeleteRequest::from_xml(xml).unwrap();
        assert_eq!(req.objects.len(), 2);
        assert_eq!(req.objects[0].key, "file1.txt");
        assert_eq!(req.objects[1].version_id.as_deref(), Some("v2"));
        assert!(req.quiet.is_none());
    }

    #[test]
    fn test_delete_request_malformed() {
        assert!(DeleteRequest::from_xml("this is not valid xml <<<>>>").is_err());
    }

    #[test]
    fn test_delete_result_quiet_suppresses_deleted() {
        let result = DeleteResult {
            deleted: vec![DeletedObject {
                key: "k".to_string(),
                version_id: None,
                delete_marker: true,
                delete_marker_version_id: Some("dm1".to_string()),
            }],
            errors: vec![],
        };
        let loud = result.to_xml(false);
        assert!(loud.contains("<DeleteMarkerVersionId>dm1</DeleteMarkerVersionId>"));
        let quiet = result.to_xml(true);
        assert!(!quiet.contains("<Deleted>"));
    }

    #[test]
    fn test_complete_request_from_xml() {
        let xml = r#"<CompleteMultipartUpload>
  <Part><PartNumber>1</PartNumber><ETag>"aaa"</ETag></Part>
  <Part><PartNumber>2</PartNumber><ETag>"bbb"</ETag></Part>
</CompleteMultipartUpload>"#;
        let req = CompleteMultipartUploadRequest::from_xml(xml).unwrap();
        assert_eq!(req.parts.len(), 2);
        assert_eq!(req.parts[0].part_number, 1);
        assert_eq!(req.parts[1].etag, "\"bbb\"");
    }

    #[test]
    fn test_versioning_request_from_xml() {
        let xml = r#"<VersioningConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Status>Enabled</Status>
</VersioningConfiguration>"#;
        let req = VersioningConfigurationRequest::from_xml(xml).unwrap();
        assert_eq!(req.status.as_deref(), Some("Enabled"));
    }

    #[test]
    fn test_versioning_configuration_xml() {
        assert!(versioning_configuration_xml(None).contains("<VersioningConfiguration"));
        assert!(versioning_configuration_xml(Some("Enabled")).contains("<Status>Enabled</Status>"));
    }

    #[test]
    fn test_tagging_from_header() {
        let xml = tagging_from_header("env=prod&team=storage").unwrap();
        assert!(xml.contains("<Key>env</Key><Value>prod</Value>"));
        assert!(xml.contains("<Key>team</Key><Value>storage</Value>"));
        assert!(tagging_from_header("").is_none());
        assert!(tagging_from_header("novalue").is_none());
    }

    #[test]
    fn test_location_constraint_default_region_is_empty() {
        assert!(location_constraint_xml("us-east-1").contains("<LocationConstraint xmlns"));
        assert!(!location_constraint_xml("us-east-1").contains(">us-east-1<"));
        assert!(location_constraint_xml("eu-west-1").contains(">eu-west-1<"));
    }
}
