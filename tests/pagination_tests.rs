//! Pagination Tests
//!
//! Multi-page aggregation and next-link validation against a mock server.
//!
//! Run: cargo nextest run --test pagination_tests

use asc_core::{Client, Credential, Error, Page, PaginationLimits, PrivateKeySource, RetryConfig};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const P256: &str = include_str!("fixtures/AuthKey_TEST256.p8");

fn client_for(server: &MockServer) -> Client {
    Client::builder()
        .credential(Credential::new(
            "main",
            "TEST256",
            "issuer",
            PrivateKeySource::pem(P256),
        ))
        .base_url(Url::parse(&format!("{}/", server.uri())).unwrap())
        .retry(RetryConfig::no_retry())
        .build()
        .unwrap()
}

fn page(ids: &[&str], next: Option<String>) -> Value {
    let data: Vec<Value> = ids
        .iter()
        .map(|id| json!({"type": "apps", "id": id}))
        .collect();
    json!({
        "data": data,
        "links": {"self": "ignored", "next": next},
        "meta": {"paging": {"total": 5, "limit": 2}}
    })
}

// Cursor mocks are mounted before the bare first-page mock so they win.
async fn mount_pages(server: &MockServer, pages: Vec<(Option<&str>, Value)>) {
    for (cursor, body) in pages.into_iter().rev() {
        let mock = Mock::given(method("GET")).and(path("/v1/apps"));
        let mock = match cursor {
            Some(cursor) => mock.and(query_param("cursor", cursor)),
            None => mock,
        };
        mock.respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(server)
            .await;
    }
}

// =============================================================================
// Aggregation
// =============================================================================

#[tokio::test]
async fn test_three_pages_concatenated_in_order() {
    let server = MockServer::start().await;
    let uri = server.uri();
    mount_pages(
        &server,
        vec![
            (None, page(&["1", "2"], Some(format!("{}/v1/apps?cursor=b", uri)))),
            (Some("b"), page(&["3", "4"], Some(format!("{}/v1/apps?cursor=c", uri)))),
            (Some("c"), page(&["5"], None)),
        ],
    )
    .await;

    let client = client_for(&server);
    let mut seen = Vec::new();
    let all: Page<Value> = client
        .paginate_with_observer("v1/apps", &CancellationToken::new(), |n, url| {
            seen.push((n, url.to_string()))
        })
        .await
        .unwrap();

    let ids: Vec<&str> = all.data.iter().map(|v| v["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
    assert!(all.links.next.is_none());
    assert_eq!(all.total(), Some(5));
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, 2);
    assert_eq!(seen[1].0, 3);
}

#[tokio::test]
async fn test_single_page() {
    let server = MockServer::start().await;
    mount_pages(&server, vec![(None, page(&["1"], None))]).await;

    let all: Page<Value> = client_for(&server)
        .paginate("v1/apps", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(all.data.len(), 1);
}

// =============================================================================
// Guards
// =============================================================================

#[tokio::test]
async fn test_cross_origin_next_link_rejected() {
    let server = MockServer::start().await;
    let attacker = MockServer::start().await;
    mount_pages(
        &server,
        vec![(None, page(&["1"], Some(format!("{}/v1/apps?cursor=b", attacker.uri()))))],
    )
    .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&attacker)
        .await;

    let err = client_for(&server)
        .paginate::<Value>("v1/apps", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SsrfRejected { .. }));
}

#[tokio::test]
async fn test_looping_next_link_aborts() {
    let server = MockServer::start().await;
    let uri = server.uri();
    Mock::given(method("GET"))
        .and(path("/v1/apps"))
        .and(query_param("cursor", "b"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(&["2"], Some(format!("{}/v1/apps?cursor=b", uri)))),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/apps"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(&["1"], Some(format!("{}/v1/apps?cursor=b", uri)))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .paginate::<Value>("v1/apps", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Pagination(m) if m.contains("already fetched")));
}

#[tokio::test]
async fn test_page_limit() {
    let server = MockServer::start().await;
    let uri = server.uri();
    mount_pages(
        &server,
        vec![
            (None, page(&["1"], Some(format!("{}/v1/apps?cursor=b", uri)))),
            (Some("b"), page(&["2"], Some(format!("{}/v1/apps?cursor=c", uri)))),
        ],
    )
    .await;

    let client = Client::builder()
        .credential(Credential::new("main", "TEST256", "issuer", PrivateKeySource::pem(P256)))
        .base_url(Url::parse(&format!("{}/", uri)).unwrap())
        .retry(RetryConfig::no_retry())
        .pagination_limits(PaginationLimits { max_pages: 2 })
        .build()
        .unwrap();

    let err = client
        .paginate::<Value>("v1/apps", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Pagination(m) if m.contains("exceeded 2 pages")));
}

#[tokio::test]
async fn test_error_on_later_page_propagates() {
    let server = MockServer::start().await;
    let uri = server.uri();
    Mock::given(method("GET"))
        .and(path("/v1/apps"))
        .and(query_param("cursor", "b"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    mount_pages(
        &server,
        vec![(None, page(&["1"], Some(format!("{}/v1/apps?cursor=b", uri))))],
    )
    .await;

    let err = client_for(&server)
        .paginate::<Value>("v1/apps", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
