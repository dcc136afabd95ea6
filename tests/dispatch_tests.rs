//! Dispatch Tests
//!
//! Signed requests, error classification, retries, rate-limit headers,
//! deadlines and redirect handling against a local mock server.
//!
//! Run: cargo nextest run --test dispatch_tests

use std::time::Duration;

use asc_core::{
    Accept, ApiErrorKind, Client, Credential, Error, ExponentialBackoff, PrivateKeySource,
    RetryConfig,
};
use futures::StreamExt;
use reqwest::Method;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const P256: &str = include_str!("fixtures/AuthKey_TEST256.p8");

fn credential() -> Credential {
    Credential::new("main", "TEST256", "69a6de7e-issuer", PrivateKeySource::pem(P256))
}

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::default()
        .with_max_retries(max_retries)
        .with_backoff(
            ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(5), 2.0)
                .with_jitter(0.0),
        )
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn client_for(server: &MockServer) -> Client {
    init_tracing();
    Client::builder()
        .credential(credential())
        .base_url(Url::parse(&format!("{}/", server.uri())).unwrap())
        .retry(fast_retry(3))
        .build()
        .unwrap()
}

// =============================================================================
// Signing and success
// =============================================================================

#[tokio::test]
async fn test_dispatch_attaches_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/apps/1"))
        .and(header_exists("authorization"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "1"}})))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cancel = CancellationToken::new();

    let first: Value = client.get_json("v1/apps/1", &cancel).await.unwrap();
    assert_eq!(first["data"]["id"], "1");
    client.get_json::<Value>("v1/apps/1", &cancel).await.unwrap();

    // Both requests reuse one cached token.
    assert_eq!(client.signer().tokens_signed(), 1);

    let requests = server.received_requests().await.unwrap();
    let auth = requests[0].headers.get("authorization").unwrap().to_str().unwrap();
    let token = auth.strip_prefix("Bearer ").unwrap();
    let jwt_header = jsonwebtoken::decode_header(token).unwrap();
    assert_eq!(jwt_header.kid.as_deref(), Some("TEST256"));
    assert_eq!(jwt_header.alg, jsonwebtoken::Algorithm::ES256);
}

#[tokio::test]
async fn test_send_json_and_delete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/bundleIds"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"data": {"id": "B1"}})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/bundleIds/B1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cancel = CancellationToken::new();

    let body = json!({"data": {"type": "bundleIds", "attributes": {"identifier": "com.example"}}});
    let created: Value = client
        .send_json(Method::POST, "v1/bundleIds", &body, &cancel)
        .await
        .unwrap();
    assert_eq!(created["data"]["id"], "B1");

    client.delete("v1/bundleIds/B1", &cancel).await.unwrap();
}

// =============================================================================
// Error classification
// =============================================================================

#[tokio::test]
async fn test_not_found_is_classified_and_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "errors": [{
                "status": "404",
                "code": "not_found",
                "title": "Bad\u{1b}[31m",
                "detail": "Detail\u{7}"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .get_json::<Value>("v1/apps/404", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(err.status_code(), Some(404));
    let rendered = err.to_string();
    assert!(rendered.contains("Bad"));
    assert!(rendered.contains("Detail"));
    assert!(!rendered.chars().any(|c| c.is_control()));
}

#[tokio::test]
async fn test_unparseable_error_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("<html>denied</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .get_json::<Value>("v1/apps", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_forbidden());
    assert_eq!(err.api_error().unwrap().kind, ApiErrorKind::Forbidden);
}

// =============================================================================
// Retries
// =============================================================================

#[tokio::test]
async fn test_server_error_retried_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    let value: Value = client_for(&server)
        .get_json("v1/apps", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(value["data"], json!([]));
}

#[tokio::test]
async fn test_rate_limited_retries_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "0")
                .set_body_json(json!({"errors": [{"code": "RATE_LIMIT_EXCEEDED", "title": "slow down"}]})),
        )
        .expect(4)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .get_json::<Value>("v1/apps", &CancellationToken::new())
        .await
        .unwrap_err();

    let api = err.api_error().unwrap();
    assert_eq!(api.status, 429);
    assert_eq!(api.code.as_deref(), Some("RATE_LIMIT_EXCEEDED"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_excessive_retry_after_returns_promptly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "86400"))
        .expect(1)
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let err = client_for(&server)
        .get_json::<Value>("v1/apps", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(2));
    let api = err.api_error().unwrap();
    assert_eq!(api.status, 429);
    assert_eq!(api.retry_after, Some(Duration::from_secs(86400)));
}

#[tokio::test]
async fn test_unauthorized_invalidates_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cancel = CancellationToken::new();
    assert!(client.get_json::<Value>("v1/apps", &cancel).await.unwrap_err().is_unauthorized());
    assert!(client.get_json::<Value>("v1/apps", &cancel).await.unwrap_err().is_unauthorized());
    assert_eq!(client.signer().tokens_signed(), 2);
}

// =============================================================================
// Rate-limit headers
// =============================================================================

#[tokio::test]
async fn test_rate_limit_header_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-rate-limit", "user-hour-lim:3600;user-hour-rem:120")
                .set_body_json(json!({"data": []})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .get_json::<Value>("v1/apps", &CancellationToken::new())
        .await
        .unwrap();

    let info = client.last_rate_limit().unwrap();
    let window = info.window("user-hour").unwrap();
    assert_eq!((window.limit, window.remaining), (Some(3600), Some(120)));
    assert!(info.is_near_limit(0.1));
    assert_eq!(info.summary(), "user-hour 120/3600 remaining");
}

// =============================================================================
// Deadlines and cancellation
// =============================================================================

#[tokio::test]
async fn test_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let client = Client::builder()
        .credential(credential())
        .base_url(Url::parse(&format!("{}/", server.uri())).unwrap())
        .timeout(Duration::from_millis(100))
        .retry(fast_retry(3))
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let err = client
        .get_json::<Value>("v1/apps", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_cancellation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = client.get_json::<Value>("v1/apps", &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_pre_cancelled_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = client_for(&server)
        .get_json::<Value>("v1/apps", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

// =============================================================================
// Redirects and streaming
// =============================================================================

#[tokio::test]
async fn test_same_origin_redirect_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/v1/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"moved": true})))
        .expect(1)
        .mount(&server)
        .await;

    let value: Value = client_for(&server)
        .get_json("v1/old", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(value["moved"], true);
}

#[tokio::test]
async fn test_cross_origin_redirect_not_followed() {
    let server = MockServer::start().await;
    let attacker = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", format!("{}/steal", attacker.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&attacker)
        .await;

    let err = client_for(&server)
        .get_json::<Value>("v1/apps", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(302));
}

#[tokio::test]
async fn test_absolute_url_on_other_origin_rejected() {
    let server = MockServer::start().await;
    let attacker = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&attacker)
        .await;

    let err = client_for(&server)
        .get_json::<Value>(&format!("{}/v1/apps", attacker.uri()), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SsrfRejected { .. }));
}

#[tokio::test]
async fn test_report_stream_accepts_gzip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/salesReports"))
        .and(header("accept", "application/a-gzip"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/a-gzip")
                .set_body_bytes(vec![0x1f, 0x8b, 0x08, 0x00]),
        )
        .expect(1)
        .mount(&server)
        .await;

    let stream = client_for(&server)
        .dispatch_stream(Method::GET, "v1/salesReports", Accept::Gzip, &CancellationToken::new())
        .await
        .unwrap();
    assert!(stream.is_gzip());
    assert_eq!(stream.bytes().await.unwrap().as_ref(), &[0x1f, 0x8b, 0x08, 0x00]);
}

#[tokio::test]
async fn test_stream_body_honors_cancellation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/salesReports"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64 * 1024]))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);

    let cancel = CancellationToken::new();
    let stream = client
        .dispatch_stream(Method::GET, "v1/salesReports", Accept::Gzip, &cancel)
        .await
        .unwrap();
    cancel.cancel();
    assert!(matches!(stream.bytes().await, Err(Error::Cancelled)));

    let cancel = CancellationToken::new();
    let stream = client
        .dispatch_stream(Method::GET, "v1/salesReports", Accept::Gzip, &cancel)
        .await
        .unwrap();
    cancel.cancel();
    let chunks: Vec<_> = stream.bytes_stream().collect().await;
    assert!(chunks.is_empty());
}

#[tokio::test]
async fn test_presigned_download_is_unauthenticated() {
    let storage = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/segment.csv.gz"))
        .and(header("accept", "application/a-gzip"))
        .respond_with(ResponseTemplate::new(200).set_body_string("report"))
        .expect(1)
        .mount(&storage)
        .await;

    let client = Client::builder()
        .credential(credential())
        .storage_host("127.0.0.1")
        .allow_insecure_http(true)
        .build()
        .unwrap();

    let stream = client
        .dispatch_stream_unauthenticated(
            &format!("{}/segment.csv.gz", storage.uri()),
            Accept::Gzip,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(stream.bytes().await.unwrap().as_ref(), b"report");

    let requests = storage.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
    assert_eq!(client.signer().tokens_signed(), 0);
}

#[tokio::test]
async fn test_presigned_untrusted_host_never_requested() {
    let storage = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&storage)
        .await;

    let client = Client::builder().credential(credential()).build().unwrap();
    let err = client
        .dispatch_stream_unauthenticated(
            &format!("{}/segment.csv.gz", storage.uri()),
            Accept::Gzip,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SsrfRejected { .. }));
}
