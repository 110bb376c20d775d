//! Shared test infrastructure for integration tests
//!
//! Provides TestServer (spawns the real karst binary on a private port and
//! data directory), an aws-sdk-s3 client factory, a minimal SigV4 signer
//! for raw-HTTP auth tests, and data generators.

#![allow(dead_code)]

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client;
use hmac::{Hmac, Mac};
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

/// Port counter to avoid conflicts between tests.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(19000);

pub const ACCESS_KEY: &str = "karst-test-key";
pub const SECRET_KEY: &str = "karst-test-secret";
pub const REGION: &str = "us-east-1";

/// Test server wrapper that spawns a real karst binary
pub struct TestServer {
    process: Child,
    port: u16,
    _data_dir: TempDir,
    auth: bool,
}

impl TestServer {
    /// Start a server with SigV4 auth enabled (the default deployment).
    pub async fn start() -> Self {
        Self::spawn(true).await
    }

    /// Start a server with auth disabled, for tests that speak raw HTTP.
    pub async fn start_unauthenticated() -> Self {
        Self::spawn(false).await
    }

    async fn spawn(auth: bool) -> Self {
        let port = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
        let data_dir = TempDir::new().expect("Failed to create temp dir");

        let mut command = Command::new(env!("CARGO_BIN_EXE_karst"));
        command
            .arg("server")
            .env("KARST_LISTEN_ADDR", format!("127.0.0.1:{port}"))
            .env("KARST_DATA_DIR", data_dir.path())
            .env("RUST_LOG", "karst=warn");
        if auth {
            command
                .env("KARST_ACCESS_KEY_ID", ACCESS_KEY)
                .env("KARST_SECRET_ACCESS_KEY", SECRET_KEY);
        } else {
            command.env("KARST_AUTH_DISABLED", "true");
        }

        let process = command.spawn().expect("Failed to start server");

        let server = Self {
            process,
            port,
            _data_dir: data_dir,
            auth,
        };
        server.wait_ready().await;
        server
    }

    async fn wait_ready(&self) {
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{}/", self.port);
        for _ in 0..100 {
            // HEAD / is the unauthenticated connection probe.
            if let Ok(resp) = client.head(&url).send().await {
                if resp.status().is_success() {
                    return;
                }
            }
            sleep(Duration::from_millis(50)).await;
        }
        panic!("server did not become ready on port {}", self.port);
    }

    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// aws-sdk-s3 client configured for path-style access to this server.
    pub async fn s3_client(&self) -> Client {
        let credentials = if self.auth {
            Credentials::new(ACCESS_KEY, SECRET_KEY, None, None, "test")
        } else {
            Credentials::new("ignored", "ignored", None, None, "test")
        };

        let config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(self.endpoint())
            .region(Region::new(REGION))
            .credentials_provider(credentials)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(true)
            .build();
        Client::from_conf(s3_config)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

/// Deterministic pseudo-random payload.
pub fn generate_binary(size: usize, seed: u64) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; size];
    rng.fill(&mut data[..]);
    data
}

// ============================================================================
// Minimal SigV4 signer for raw-HTTP auth tests
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

pub const EMPTY_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
pub const STREAMING_PAYLOAD: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD";

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub fn signing_key(secret: &str, date: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, REGION.as_bytes());
    let k_service = hmac(&k_region, b"s3");
    hmac(&k_service, b"aws4_request")
}

/// A signed request ready to send: Authorization value plus the signature
/// it carries (streaming uploads chain chunk signatures off it).
pub struct Signed {
    pub authorization: String,
    pub signature: String,
    pub amz_date: String,
    pub scope: String,
}

/// Sign `method path` with headers host/x-amz-content-sha256/x-amz-date
/// (plus any `extra_signed` pairs, already lowercase and sorted into
/// place by this function).
pub fn sign_request(
    host: &str,
    method: &str,
    path: &str,
    query: &str,
    payload_hash: &str,
    amz_date: &str,
    extra_signed: &[(&str, &str)],
) -> Signed {
    let date = &amz_date[..8];
    let scope = format!("{date}/{REGION}/s3/aws4_request");

    let mut headers: Vec<(String, String)> = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date.to_string()),
    ];
    for (k, v) in extra_signed {
        headers.push((k.to_string(), v.to_string()));
    }
    headers.sort();

    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect();

    let canonical_request = format!(
        "{method}\n{path}\n{query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(SECRET_KEY, date);
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={ACCESS_KEY}/{scope}, SignedHeaders={signed_headers}, Signature={signature}"
    );

    Signed {
        authorization,
        signature,
        amz_date: amz_date.to_string(),
        scope,
    }
}

pub fn now_amz_date() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

/// Frame `chunks` as an aws-chunked body with valid chained signatures.
pub fn build_chunked_body(seed: &Signed, key: &[u8], chunks: &[&[u8]]) -> Vec<u8> {
    let mut prev = seed.signature.clone();
    let mut body = Vec::new();
    let mut all: Vec<&[u8]> = chunks.to_vec();
    all.push(b"");
    for chunk in all {
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256-PAYLOAD\n{}\n{}\n{}\n{}\n{}",
            seed.amz_date,
            seed.scope,
            prev,
            EMPTY_SHA256,
            hex::encode(Sha256::digest(chunk)),
        );
        let sig = hex::encode(hmac(key, string_to_sign.as_bytes()));
        body.extend_from_slice(format!("{:x};chunk-signature={sig}\r\n", chunk.len()).as_bytes());
        body.extend_from_slice(chunk);
        body.extend_from_slice(b"\r\n");
        prev = sig;
    }
    body
}
