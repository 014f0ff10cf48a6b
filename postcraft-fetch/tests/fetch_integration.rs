//! HTTP-facing behaviour of the fetch strategies, the racing fetcher, the
//! URL checker and sitemap discovery, exercised against local mock servers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use postcraft_fetch::config::SITEMAP_ACCEPT;
use postcraft_fetch::http::build_client;
use postcraft_fetch::race::{DirectStrategy, ProxyStrategy, RelayStrategy};
use postcraft_fetch::sitemap::discover_sitemaps;
use postcraft_fetch::{
    CacheConfig, FetchError, FetchStrategy, HttpConfig, RaceConfig, RacingFetcher, TtlCache,
    UrlChecker,
};
use serde_json::json;
use wiremock::matchers::{body_json, headers, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SITEMAP: &str = r#"<?xml version="1.0"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"><url><loc>https://site.test/</loc></url></urlset>"#;

fn client() -> reqwest::Client {
    build_client(&HttpConfig::default()).expect("client")
}

fn checker() -> UrlChecker {
    let cache = TtlCache::new("url_validity", &CacheConfig::default()).expect("cache");
    UrlChecker::new(client(), cache)
}

// ────────────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn direct_strategy_sends_sitemap_accept_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .and(headers("accept", SITEMAP_ACCEPT.split(", ").collect()))
        .respond_with(ResponseTemplate::new(200).set_body_string(SITEMAP))
        .expect(1)
        .mount(&server)
        .await;

    let body = DirectStrategy::new(client())
        .fetch(&format!("{}/sitemap.xml", server.uri()))
        .await
        .expect("direct fetch");
    assert_eq!(body, SITEMAP);
}

#[tokio::test]
async fn direct_strategy_maps_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = DirectStrategy::new(client())
        .fetch(&format!("{}/sitemap.xml", server.uri()))
        .await
        .unwrap_err();
    match &err {
        FetchError::Upstream { status, message } => {
            assert_eq!(*status, Some(503));
            assert!(message.contains("maintenance"));
        }
        other => panic!("expected upstream error, got {other:?}"),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn relay_strategy_posts_target_and_unwraps_envelope() {
    let server = MockServer::start().await;
    let target = "https://blocked.test/sitemap.xml";
    Mock::given(method("POST"))
        .and(path("/functions/v1/fetch-sitemap"))
        .and(body_json(json!({ "url": target })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "content": SITEMAP })))
        .expect(1)
        .mount(&server)
        .await;

    let relay = RelayStrategy::new(
        client(),
        format!("{}/functions/v1/fetch-sitemap", server.uri()),
    );
    assert_eq!(relay.name(), "via-edge-function");
    let body = relay.fetch(target).await.expect("relay fetch");
    assert_eq!(body, SITEMAP);
}

#[tokio::test]
async fn proxy_strategy_passes_encoded_target() {
    let server = MockServer::start().await;
    let target = "https://blocked.test/sitemap.xml?page=2";
    Mock::given(method("GET"))
        .and(path("/raw"))
        .and(query_param("url", target))
        .respond_with(ResponseTemplate::new(200).set_body_string(SITEMAP))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = ProxyStrategy::new(
        "via-proxy-a",
        client(),
        format!("{}/raw?url={{url}}", server.uri()),
    )
    .expect("template");
    assert_eq!(proxy.fetch(target).await.expect("proxy fetch"), SITEMAP);
}

// ────────────────────────────────────────────────────────────────────────────
// Racing
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn race_skips_invalid_content_over_http() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<!DOCTYPE html><html>Just a moment...</html>"),
        )
        .mount(&origin)
        .await;

    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(SITEMAP)
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&proxy)
        .await;

    let config = RaceConfig::default().with_proxy("via-proxy-a", format!("{}/get?u={{url}}", proxy.uri()));
    let fetcher = RacingFetcher::from_config(&config, &client()).expect("fetcher");
    assert_eq!(fetcher.strategy_names(), ["direct", "via-proxy-a"]);

    let winner = fetcher
        .race(&format!("{}/sitemap.xml", origin.uri()))
        .await
        .expect("proxy should win");
    assert_eq!(winner.strategy, "via-proxy-a");
    assert_eq!(winner.content, SITEMAP);
}

#[tokio::test]
async fn race_does_not_wait_for_slow_relay() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/relay"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(SITEMAP)
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SITEMAP))
        .mount(&server)
        .await;

    let strategies: Vec<Arc<dyn FetchStrategy>> = vec![
        Arc::new(RelayStrategy::new(client(), format!("{}/relay", server.uri()))),
        Arc::new(DirectStrategy::new(client())),
    ];
    let fetcher = RacingFetcher::new(strategies, RaceConfig::default()).expect("fetcher");

    let start = Instant::now();
    let winner = fetcher
        .race(&format!("{}/sitemap.xml", server.uri()))
        .await
        .expect("direct should win");
    assert_eq!(winner.strategy, "direct");
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn race_reports_every_strategy_on_total_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let config = RaceConfig::default()
        .with_proxy("via-proxy-a", format!("{}/a?u={{url}}", server.uri()))
        .with_proxy("via-proxy-b", format!("{}/b?u={{url}}", server.uri()));
    let fetcher = RacingFetcher::from_config(&config, &client()).expect("fetcher");

    match fetcher.race(&format!("{}/sitemap.xml", server.uri())).await {
        Err(FetchError::AllStrategiesFailed(failures)) => {
            let names: Vec<&str> = failures.iter().map(|f| f.strategy.as_str()).collect();
            assert_eq!(names, ["direct", "via-proxy-a", "via-proxy-b"]);
            assert!(failures.iter().all(|f| f.reason.contains("403")));
        }
        other => panic!("expected aggregate failure, got {other:?}"),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// URL checker
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn url_checker_caches_verdicts() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/article"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let checker = checker();
    let article = format!("{}/article", server.uri());
    let missing = format!("{}/missing", server.uri());
    assert!(checker.is_reachable(&article).await);
    assert!(checker.is_reachable(&article).await);
    assert!(!checker.is_reachable(&missing).await);
    assert!(!checker.is_reachable(&missing).await);
}

#[tokio::test]
async fn url_checker_falls_back_to_get_when_head_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    assert!(checker().is_reachable(&format!("{}/page", server.uri())).await);
}

#[tokio::test]
async fn url_checker_does_not_cache_transport_failures() {
    let checker = checker().with_timeout(Duration::from_millis(200));
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let url = format!("{}/slow", server.uri());
    let result = checker.check(&url).await;
    assert!(matches!(result, Err(FetchError::Timeout { .. })));
    assert!(!checker.is_reachable(&url).await);
}

#[tokio::test]
async fn filter_reachable_keeps_input_order_up_to_target() {
    let server = MockServer::start().await;
    for (p, status) in [("/a", 404), ("/b", 200), ("/c", 200), ("/d", 200)] {
        Mock::given(method("HEAD"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }
    let urls: Vec<String> = ["/a", "/b", "/c", "/d"]
        .iter()
        .map(|p| format!("{}{p}", server.uri()))
        .collect();

    let kept = checker().filter_reachable(urls.clone(), 1, 2).await;
    assert_eq!(kept, [urls[1].clone(), urls[2].clone()]);
}

// ────────────────────────────────────────────────────────────────────────────
// Discovery
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn discovery_prefers_robots_txt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "User-agent: *\nDisallow: /admin\nSitemap: {}/news-sitemap.xml\nSitemap: /post-sitemap.xml\n",
            server.uri()
        )))
        .mount(&server)
        .await;

    let found = discover_sitemaps(&server.uri(), &checker())
        .await
        .expect("discover");
    assert_eq!(
        found,
        [
            format!("{}/news-sitemap.xml", server.uri()),
            format!("{}/post-sitemap.xml", server.uri()),
        ]
    );
}

#[tokio::test]
async fn discovery_probes_well_known_paths() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/sitemap_index.xml"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/wp-sitemap.xml"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let found = discover_sitemaps(&format!("{}/blog/", server.uri()), &checker())
        .await
        .expect("discover");
    assert_eq!(found, [format!("{}/sitemap_index.xml", server.uri())]);
}

#[tokio::test]
async fn discovery_finds_nothing_on_empty_site() {
    let server = MockServer::start().await;
    let found = discover_sitemaps(&server.uri(), &checker())
        .await
        .expect("discover");
    assert!(found.is_empty());
}
