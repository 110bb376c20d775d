//! Signature verification over raw HTTP
//!
//! The AWS SDK signs everything correctly, so the negative cases here are
//! driven with reqwest and a hand-rolled signer: tampered signatures,
//! skewed clocks, unknown keys, and chunk-signed streaming bodies.

mod common;

use common::{
    build_chunked_body, now_amz_date, sign_request, signing_key, TestServer, ACCESS_KEY,
    EMPTY_SHA256, SECRET_KEY, STREAMING_PAYLOAD,
};
use sha2::{Digest, Sha256};

fn host_of(server: &TestServer) -> String {
    format!("127.0.0.1:{}", server.port())
}

#[tokio::test]
async fn test_signed_request_passes() {
    let server = TestServer::start().await;
    let host = host_of(&server);
    let amz_date = now_amz_date();

    let signed = sign_request(&host, "GET", "/", "", EMPTY_SHA256, &amz_date, &[]);

    let response = reqwest::Client::new()
        .get(format!("{}/", server.endpoint()))
        .header("authorization", &signed.authorization)
        .header("x-amz-content-sha256", EMPTY_SHA256)
        .header("x-amz-date", &amz_date)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200, "{}", response.text().await.unwrap());
    assert!(response
        .headers()
        .contains_key("x-amz-request-id"));
}

#[tokio::test]
async fn test_missing_authorization_is_denied() {
    let server = TestServer::start().await;

    let response = reqwest::Client::new()
        .get(format!("{}/", server.endpoint()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    assert!(response.text().await.unwrap().contains("AccessDenied"));
}

#[tokio::test]
async fn test_tampered_signature_is_rejected() {
    let server = TestServer::start().await;
    let host = host_of(&server);
    let amz_date = now_amz_date();

    let signed = sign_request(&host, "GET", "/", "", EMPTY_SHA256, &amz_date, &[]);
    // Corrupt the final hex digit of the signature.
    let tampered = {
        let mut s = signed.authorization.clone();
        let last = if s.ends_with('0') { '1' } else { '0' };
        s.pop();
        s.push(last);
        s
    };

    let response = reqwest::Client::new()
        .get(format!("{}/", server.endpoint()))
        .header("authorization", tampered)
        .header("x-amz-content-sha256", EMPTY_SHA256)
        .header("x-amz-date", &amz_date)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    assert!(response
        .text()
        .await
        .unwrap()
        .contains("SignatureDoesNotMatch"));
}

#[tokio::test]
async fn test_flipped_signed_header_is_rejected() {
    let server = TestServer::start().await;
    let host = host_of(&server);
    let amz_date = now_amz_date();

    // Sign with one date, send another (still inside the skew window).
    let signed = sign_request(&host, "GET", "/", "", EMPTY_SHA256, &amz_date, &[]);
    let other_date = (chrono::Utc::now() - chrono::Duration::minutes(5))
        .format("%Y%m%dT%H%M%SZ")
        .to_string();

    let response = reqwest::Client::new()
        .get(format!("{}/", server.endpoint()))
        .header("authorization", &signed.authorization)
        .header("x-amz-content-sha256", EMPTY_SHA256)
        .header("x-amz-date", &other_date)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    assert!(response
        .text()
        .await
        .unwrap()
        .contains("SignatureDoesNotMatch"));
}

#[tokio::test]
async fn test_unknown_access_key() {
    let server = TestServer::start().await;
    let host = host_of(&server);
    let amz_date = now_amz_date();

    let signed = sign_request(&host, "GET", "/", "", EMPTY_SHA256, &amz_date, &[]);
    let swapped = signed
        .authorization
        .replace(ACCESS_KEY, "AKIANOBODYHOME");

    let response = reqwest::Client::new()
        .get(format!("{}/", server.endpoint()))
        .header("authorization", swapped)
        .header("x-amz-content-sha256", EMPTY_SHA256)
        .header("x-amz-date", &amz_date)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    assert!(response
        .text()
        .await
        .unwrap()
        .contains("InvalidAccessKeyId"));
}

#[tokio::test]
async fn test_skewed_clock_is_rejected() {
    let server = TestServer::start().await;
    let host = host_of(&server);
    // Twenty minutes in the past, correctly signed.
    let amz_date = (chrono::Utc::now() - chrono::Duration::minutes(20))
        .format("%Y%m%dT%H%M%SZ")
        .to_string();

    let signed = sign_request(&host, "GET", "/", "", EMPTY_SHA256, &amz_date, &[]);

    let response = reqwest::Client::new()
        .get(format!("{}/", server.endpoint()))
        .header("authorization", &signed.authorization)
        .header("x-amz-content-sha256", EMPTY_SHA256)
        .header("x-amz-date", &amz_date)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    assert!(response
        .text()
        .await
        .unwrap()
        .contains("RequestTimeTooSkewed"));
}

#[tokio::test]
async fn test_tampered_body_against_signed_hash() {
    let server = TestServer::start().await;
    let host = host_of(&server);
    let client = server.s3_client().await;
    client.create_bucket().bucket("b1").send().await.unwrap();

    let amz_date = now_amz_date();
    let real_payload = b"genuine content";
    let payload_hash = hex::encode(Sha256::digest(real_payload));

    let signed = sign_request(
        &host,
        "PUT",
        "/b1/tampered.txt",
        "",
        &payload_hash,
        &amz_date,
        &[],
    );

    // Send a different body than the one whose hash was signed.
    let response = reqwest::Client::new()
        .put(format!("{}/b1/tampered.txt", server.endpoint()))
        .header("authorization", &signed.authorization)
        .header("x-amz-content-sha256", &payload_hash)
        .header("x-amz-date", &amz_date)
        .body(&b"malicious content"[..])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    assert!(response
        .text()
        .await
        .unwrap()
        .contains("SignatureDoesNotMatch"));

    // Nothing was committed.
    assert!(client
        .head_object()
        .bucket("b1")
        .key("tampered.txt")
        .send()
        .await
        .is_err());
}

// ============================================================================
// Streaming chunk-signed uploads
// ============================================================================

/// Sign and send a chunk-framed PUT; returns the HTTP response.
async fn chunked_put(
    server: &TestServer,
    bucket: &str,
    key: &str,
    chunks: &[&[u8]],
    tamper: bool,
) -> reqwest::Response {
    let host = host_of(server);
    let amz_date = now_amz_date();
    let decoded_length: usize = chunks.iter().map(|c| c.len()).sum();

    let signed = sign_request(
        &host,
        "PUT",
        &format!("/{bucket}/{key}"),
        "",
        STREAMING_PAYLOAD,
        &amz_date,
        &[
            ("content-encoding", "aws-chunked"),
            (
                "x-amz-decoded-content-length",
                &decoded_length.to_string(),
            ),
        ],
    );

    let key_bytes = signing_key(SECRET_KEY, &amz_date[..8]);
    let mut body = build_chunked_body(&signed, &key_bytes, chunks);
    if tamper {
        // Flip a payload byte inside the first chunk (after its header
        // line) so the frame still parses but the signature is wrong.
        let data_start = body
            .windows(2)
            .position(|w| w == b"\r\n")
            .expect("chunk header")
            + 2;
        body[data_start] ^= 0x01;
    }

    reqwest::Client::new()
        .put(format!("{}/{bucket}/{key}", server.endpoint()))
        .header("authorization", &signed.authorization)
        .header("x-amz-content-sha256", STREAMING_PAYLOAD)
        .header("x-amz-date", &amz_date)
        .header("content-encoding", "aws-chunked")
        .header("x-amz-decoded-content-length", decoded_length.to_string())
        .body(body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_chunk_signed_put_roundtrip() {
    let server = TestServer::start().await;
    let client = server.s3_client().await;
    client.create_bucket().bucket("b1").send().await.unwrap();

    // 5 MiB in 16 KiB chunks, the shape the SDKs produce.
    let payload = common::generate_binary(5 * 1024 * 1024, 21);
    let chunks: Vec<&[u8]> = payload.chunks(16 * 1024).collect();

    let response = chunked_put(&server, "b1", "streamed.bin", &chunks, false).await;
    assert_eq!(response.status(), 200, "{}", response.text().await.unwrap());

    // The stored object is the decoded payload, byte for byte.
    let body = client
        .get_object()
        .bucket("b1")
        .key("streamed.bin")
        .send()
        .await
        .unwrap()
        .body
        .collect()
        .await
        .unwrap()
        .into_bytes();
    assert_eq!(body.as_ref(), payload.as_slice());
}

#[tokio::test]
async fn test_tampered_chunk_aborts_write() {
    let server = TestServer::start().await;
    let client = server.s3_client().await;
    client.create_bucket().bucket("b1").send().await.unwrap();

    let payload = common::generate_binary(64 * 1024, 22);
    let chunks: Vec<&[u8]> = payload.chunks(16 * 1024).collect();

    let response = chunked_put(&server, "b1", "poisoned.bin", &chunks, true).await;
    assert_eq!(response.status(), 403);
    assert!(response
        .text()
        .await
        .unwrap()
        .contains("SignatureDoesNotMatch"));

    // The aborted write left no row behind.
    assert!(client
        .head_object()
        .bucket("b1")
        .key("poisoned.bin")
        .send()
        .await
        .is_err());
}

#[tokio::test]
async fn test_auth_disabled_mode_accepts_anonymous_requests() {
    let server = TestServer::start_unauthenticated().await;

    let response = reqwest::Client::new()
        .get(format!("{}/", server.endpoint()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response
        .text()
        .await
        .unwrap()
        .contains("ListAllMyBucketsResult"));
}
