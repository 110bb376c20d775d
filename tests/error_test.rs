//! Error taxonomy: codes, statuses, and the XML error body shape

mod common;

use aws_sdk_s3::primitives::ByteStream;
use common::TestServer;

#[tokio::test]
async fn test_missing_bucket_and_key_are_404() {
    let server = TestServer::start().await;
    let client = server.s3_client().await;

    let err = client
        .get_object()
        .bucket("ghost")
        .key("k")
        .send()
        .await
        .expect_err("GET in a missing bucket should fail");
    assert_eq!(err.into_service_error().meta().code(), Some("NoSuchBucket"));

    client.create_bucket().bucket("real").send().await.unwrap();
    let err = client
        .get_object()
        .bucket("real")
        .key("nothing-here")
        .send()
        .await
        .expect_err("GET of a missing key should fail");
    assert_eq!(err.into_service_error().meta().code(), Some("NoSuchKey"));
}

#[tokio::test]
async fn test_error_body_shape() {
    let server = TestServer::start_unauthenticated().await;

    // Raw request so the XML comes back unparsed.
    let response = reqwest::Client::new()
        .get(format!("{}/missing-bucket/some/key", server.endpoint()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/xml")
    );
    let request_id = response
        .headers()
        .get("x-amz-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("every error carries a request id");

    let body = response.text().await.unwrap();
    assert!(body.contains("<Error>"));
    assert!(body.contains("<Code>NoSuchBucket</Code>"));
    assert!(body.contains("<Message>"));
    assert!(body.contains("<Resource>missing-bucket</Resource>"));
    assert!(body.contains(&format!("<RequestId>{request_id}</RequestId>")));
}

#[tokio::test]
async fn test_request_ids_are_unique_per_response() {
    let server = TestServer::start_unauthenticated().await;
    let client = reqwest::Client::new();

    let mut ids = std::collections::HashSet::new();
    for _ in 0..3 {
        let response = client
            .get(format!("{}/nope/nope", server.endpoint()))
            .send()
            .await
            .unwrap();
        let id = response
            .headers()
            .get("x-amz-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        ids.insert(id);
    }
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn test_malformed_delete_xml() {
    let server = TestServer::start_unauthenticated().await;

    let client = reqwest::Client::new();
    client
        .put(format!("{}/b1", server.endpoint()))
        .send()
        .await
        .unwrap();

    let response = client
        .post(format!("{}/b1?delete", server.endpoint()))
        .body("<Delete><Object><Key>unclosed")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(response.text().await.unwrap().contains("MalformedXML"));
}

#[tokio::test]
async fn test_post_without_subresource_is_invalid() {
    let server = TestServer::start_unauthenticated().await;
    let client = reqwest::Client::new();
    client
        .put(format!("{}/b1", server.endpoint()))
        .send()
        .await
        .unwrap();

    let response = client
        .post(format!("{}/b1/key", server.endpoint()))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(response.text().await.unwrap().contains("InvalidRequest"));
}

#[tokio::test]
async fn test_bad_content_md5_rejected() {
    let server = TestServer::start_unauthenticated().await;
    let client = reqwest::Client::new();
    client
        .put(format!("{}/b1", server.endpoint()))
        .send()
        .await
        .unwrap();

    // Valid base64, wrong digest.
    let response = client
        .put(format!("{}/b1/bad-md5.txt", server.endpoint()))
        .header("content-md5", "AAAAAAAAAAAAAAAAAAAAAA==")
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(response.text().await.unwrap().contains("BadDigest"));

    // The failed write is not visible.
    let response = client
        .get(format!("{}/b1/bad-md5.txt", server.endpoint()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_416_carries_content_range() {
    let server = TestServer::start_unauthenticated().await;
    let client = reqwest::Client::new();
    client
        .put(format!("{}/b1", server.endpoint()))
        .send()
        .await
        .unwrap();
    client
        .put(format!("{}/b1/four.txt", server.endpoint()))
        .body("1234")
        .send()
        .await
        .unwrap();

    let response = client
        .get(format!("{}/b1/four.txt", server.endpoint()))
        .header("range", "bytes=50-60")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 416);
    assert_eq!(
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok()),
        Some("bytes */4")
    );
}

#[tokio::test]
async fn test_delete_missing_object_is_204() {
    let server = TestServer::start().await;
    let client = server.s3_client().await;
    client.create_bucket().bucket("b1").send().await.unwrap();

    // S3 treats deleting a missing key as success.
    client
        .delete_object()
        .bucket("b1")
        .key("never-existed")
        .send()
        .await
        .expect("DELETE of a missing key should be a no-op success");
}

#[tokio::test]
async fn test_etag_preserved_for_multipart_copies() {
    // CopyObject of a multipart-completed object keeps the composite
    // `-N` ETag even though the bytes are restaged.
    let server = TestServer::start().await;
    let client = server.s3_client().await;
    client.create_bucket().bucket("b1").send().await.unwrap();

    let create = client
        .create_multipart_upload()
        .bucket("b1")
        .key("multi")
        .send()
        .await
        .unwrap();
    let upload_id = create.upload_id().unwrap().to_string();
    let part = client
        .upload_part()
        .bucket("b1")
        .key("multi")
        .upload_id(&upload_id)
        .part_number(1)
        .body(ByteStream::from(common::generate_binary(1024, 3)))
        .send()
        .await
        .unwrap();
    let completed = aws_sdk_s3::types::CompletedMultipartUpload::builder()
        .parts(
            aws_sdk_s3::types::CompletedPart::builder()
                .part_number(1)
                .e_tag(part.e_tag().unwrap())
                .build(),
        )
        .build();
    let done = client
        .complete_multipart_upload()
        .bucket("b1")
        .key("multi")
        .upload_id(&upload_id)
        .multipart_upload(completed)
        .send()
        .await
        .unwrap();
    let composite = done.e_tag().unwrap().to_string();
    assert!(composite.ends_with("-1\""));

    let copy = client
        .copy_object()
        .bucket("b1")
        .key("multi-copy")
        .copy_source("b1/multi")
        .send()
        .await
        .unwrap();
    assert_eq!(
        copy.copy_object_result().and_then(|r| r.e_tag()),
        Some(composite.as_str())
    );
}
