use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tvlink::error::ResolveError;
use tvlink::store::{KeyValueStore, MemoryStore};
use tvlink::{Config, StreamResolver};

fn test_config(base_url: &str) -> Config {
    let mut config = Config::default();
    config.upstream.base_url = base_url.to_string();
    config.retry.attempt_timeout_secs = 2;
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 20;
    config.preload.session_delay_ms = 10;
    config
}

fn resolver_for(config: &Config) -> (StreamResolver, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let resolver = StreamResolver::new(config, store.clone()).unwrap();
    (resolver, store)
}

fn session_body(url: &str) -> serde_json::Value {
    json!({ "success": true, "proxyUrl": url })
}

fn stream_body(url: &str) -> serde_json::Value {
    json!({ "success": true, "streamUrl": url })
}

#[tokio::test]
async fn concurrent_session_inits_share_one_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/session/espn"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(session_body("http://cdn/espn"))
                .set_delay(std::time::Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let (resolver, _) = resolver_for(&config);

    let (a, b) = tokio::join!(
        resolver.initialize_session("espn"),
        resolver.initialize_session("espn"),
    );

    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.playable_url(), Some("http://cdn/espn"));
    assert_eq!(b.playable_url(), Some("http://cdn/espn"));
}

#[tokio::test]
async fn concurrent_session_failures_reject_identically() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/session/espn"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": false, "message": "geo blocked" }))
                .set_delay(std::time::Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let (resolver, store) = resolver_for(&config);

    let (a, b) = tokio::join!(
        resolver.initialize_session("espn"),
        resolver.initialize_session("espn"),
    );

    let a = a.unwrap_err();
    let b = b.unwrap_err();
    assert_eq!(a, b);
    assert!(matches!(a, ResolveError::InvalidResponse { .. }));
    assert!(a.to_string().contains("geo blocked"));

    // Nothing may be cached on failure.
    assert!(store.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn cache_hit_skips_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stream/sky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stream_body("http://cdn/sky")))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let (resolver, _) = resolver_for(&config);

    let first = resolver.resolve_stream_url("sky").await.unwrap();
    let second = resolver.resolve_stream_url("sky").await.unwrap();
    assert_eq!(first, "http://cdn/sky");
    assert_eq!(second, "http://cdn/sky");
}

#[tokio::test]
async fn expired_entries_trigger_a_fresh_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stream/sky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stream_body("http://cdn/sky")))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.cache.ttl_secs = 0;
    let (resolver, _) = resolver_for(&config);

    resolver.resolve_stream_url("sky").await.unwrap();
    resolver.resolve_stream_url("sky").await.unwrap();
}

#[tokio::test]
async fn exhausted_retries_name_channel_and_attempts_and_cache_nothing() {
    // Grab a port that nothing is listening on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let config = test_config(&format!("http://127.0.0.1:{}", port));
    let (resolver, store) = resolver_for(&config);

    let err = resolver.resolve_stream_url("espn").await.unwrap_err();
    match err {
        ResolveError::Exhausted {
            channel, attempts, ..
        } => {
            assert_eq!(channel, "espn");
            assert_eq!(attempts, 4);
        }
        other => panic!("expected Exhausted, got {:?}", other),
    }

    assert_eq!(resolver.cache().get("espn"), None);
    assert!(store.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_response_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stream/espn"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": false })))
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let (resolver, store) = resolver_for(&config);

    let err = resolver.resolve_stream_url("espn").await.unwrap_err();
    assert!(matches!(err, ResolveError::InvalidResponse { .. }));
    assert!(!err.is_transient());
    assert!(store.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn non_2xx_status_is_a_domain_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/session/espn"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let (resolver, _) = resolver_for(&config);

    let err = resolver.initialize_session("espn").await.unwrap_err();
    assert!(matches!(err, ResolveError::InvalidResponse { .. }));
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn catalog_route_shares_the_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/channels/bt-sport"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stream_body("http://cdn/bt")))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let (resolver, _) = resolver_for(&config);

    let from_catalog = resolver.get_channels_stream("bt-sport").await.unwrap();
    assert_eq!(from_catalog, "http://cdn/bt");

    // The generic route sees the catalog-resolved entry: shared key space.
    let from_stream_route = resolver.resolve_stream_url("bt-sport").await.unwrap();
    assert_eq!(from_stream_route, "http://cdn/bt");
}

#[tokio::test]
async fn preload_tolerates_partial_failure() {
    let server = MockServer::start().await;
    for id in ["alpha", "gamma"] {
        Mock::given(method("GET"))
            .and(path(format!("/api/stream/{}", id)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(stream_body(&format!("http://cdn/{}", id))),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/api/session/{}", id)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(session_body(&format!("http://proxy/{}", id))),
            )
            .mount(&server)
            .await;
    }
    // "beta" fails on both routes.
    for route in ["stream", "session"] {
        Mock::given(method("GET"))
            .and(path(format!("/api/{}/beta", route)))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
    }

    let config = test_config(&server.uri());
    let (resolver, _) = resolver_for(&config);

    let ids: Vec<String> = ["alpha", "beta", "gamma"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let report = resolver.preload(&ids).await;

    assert_eq!(report.requested, 3);
    assert_eq!(report.resolved, 2);
    assert_eq!(report.sessions, 2);

    assert!(resolver.cache().get("alpha").is_some());
    assert!(resolver.cache().get("beta").is_none());
    assert!(resolver.cache().get("gamma").is_some());
}

#[tokio::test]
async fn preload_of_all_failures_still_reports() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let (resolver, _) = resolver_for(&config);

    let ids: Vec<String> = vec!["a".to_string(), "b".to_string()];
    let report = resolver.preload(&ids).await;
    assert_eq!(report.requested, 2);
    assert_eq!(report.resolved, 0);
    assert_eq!(report.sessions, 0);
}

#[tokio::test]
async fn invalidate_all_forgets_every_channel() {
    let server = MockServer::start().await;
    for id in ["a", "b"] {
        Mock::given(method("GET"))
            .and(path(format!("/api/stream/{}", id)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(stream_body(&format!("http://cdn/{}", id))),
            )
            .mount(&server)
            .await;
    }

    let config = test_config(&server.uri());
    let (resolver, store) = resolver_for(&config);

    resolver.resolve_stream_url("a").await.unwrap();
    resolver.resolve_stream_url("b").await.unwrap();
    assert_eq!(store.keys().await.unwrap().len(), 2);

    resolver.invalidate_all().await.unwrap();

    assert_eq!(resolver.cache().get("a"), None);
    assert_eq!(resolver.cache().get("b"), None);
    assert!(store.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn session_success_writes_through_to_the_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/session/espn"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("http://proxy/espn")))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let (resolver, store) = resolver_for(&config);

    resolver.initialize_session("espn").await.unwrap();

    // Resolution now comes from the cache without another upstream call.
    let url = resolver.resolve_stream_url("espn").await.unwrap();
    assert_eq!(url, "http://proxy/espn");
    assert!(store.get("streamUrl_espn").await.unwrap().is_some());
}
