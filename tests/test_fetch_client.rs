//! Integration tests for UpstreamClient against a mock render service

use futures::TryStreamExt;
use grafana_fetch::{FetchError, TlsPolicy, UpstreamClient};
use std::time::Duration;
use url::Url;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nrendered panel";

fn render_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}/render/d-solo/abc/ops?panelId=4", server.uri())).unwrap()
}

#[tokio::test]
async fn test_fetch_streams_body_and_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/render/d-solo/abc/ops"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "image/png")
                .set_body_bytes(PNG_BYTES),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = UpstreamClient::new(&TlsPolicy::default()).unwrap();
    let response = client.fetch(&render_url(&server), None).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.content_type(), Some("image/png"));
    let chunks: Vec<bytes::Bytes> = response.into_stream().try_collect().await.unwrap();
    assert_eq!(chunks.concat(), PNG_BYTES);
}

#[tokio::test]
async fn test_bearer_token_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("Authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = UpstreamClient::new(&TlsPolicy::default()).unwrap();
    let response = client.fetch(&render_url(&server), Some("s3cret")).await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_empty_token_sends_no_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header_exists("Authorization"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = UpstreamClient::new(&TlsPolicy::default()).unwrap();

    let response = client.fetch(&render_url(&server), Some("")).await.unwrap();
    assert_eq!(response.status(), 200);

    let response = client.fetch(&render_url(&server), None).await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_error_statuses_are_returned_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("renderer busy"))
        .mount(&server)
        .await;

    let client = UpstreamClient::new(&TlsPolicy::default()).unwrap();
    let response = client.fetch(&render_url(&server), None).await.unwrap();
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn test_timeout_is_fetch_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client =
        UpstreamClient::with_timeout(&TlsPolicy::default(), Duration::from_millis(100)).unwrap();
    let result = client.fetch(&render_url(&server), None).await;
    assert!(matches!(result, Err(FetchError::UpstreamFetch(_))));
}
