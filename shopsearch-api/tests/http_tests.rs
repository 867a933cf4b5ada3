use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::{json, Value};
use shopsearch_api::{routes, AppState};
use shopsearch_core::{
    AbuseAction, CacheKey, KeyPage, KeyValueStore, ManualClock, RateLimitPolicy, ResilienceSettings,
    StoreResult, WindowOutcome,
};
use shopsearch_storage::{CatalogBackend, MemoryStore};
use tower::ServiceExt;

// ===== Test Helper Functions =====

/// A store whose every call hangs until the caller gives up.
#[derive(Debug)]
struct HangingStore;

#[async_trait]
impl KeyValueStore for HangingStore {
    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        std::future::pending().await
    }
    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> StoreResult<()> {
        std::future::pending().await
    }
    async fn delete(&self, _key: &str) -> StoreResult<u64> {
        std::future::pending().await
    }
    async fn scan_page(&self, _pattern: &str, _cursor: Option<&str>) -> StoreResult<KeyPage> {
        std::future::pending().await
    }
    async fn expire(&self, _key: &str, _ttl: Duration) -> StoreResult<bool> {
        std::future::pending().await
    }
    async fn window_admit(
        &self,
        _key: &str,
        _member: &str,
        _now: DateTime<Utc>,
        _window: Duration,
        _ceiling: u64,
    ) -> StoreResult<WindowOutcome> {
        std::future::pending().await
    }
    async fn ping(&self) -> StoreResult<()> {
        std::future::pending().await
    }
    fn backend(&self) -> &'static str {
        "hanging"
    }
}

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
}

impl TestApp {
    fn new(settings: ResilienceSettings) -> Self {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let state = AppState::with_clock(
            store.clone(),
            Arc::new(CatalogBackend::sample()),
            settings,
            clock.clone(),
        );
        Self {
            router: routes(state),
            clock,
            store,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, ip: &str) -> Response {
        self.send(
            Request::builder()
                .uri(uri)
                .header("x-forwarded-for", ip)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn admin(&self, method: &str, uri: &str, body: Value) -> Response {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Waits for the detached cache write-back of `key` to land.
    async fn wait_for_key(&self, key: &CacheKey) {
        for _ in 0..100 {
            if self.store.get(&key.to_string()).await.unwrap().is_some() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("cache write-back never landed for {}", key);
    }
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn header_str<'a>(response: &'a Response, name: &str) -> &'a str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

// ===== Public endpoints =====

#[tokio::test]
async fn test_search_returns_results_with_quota_headers() {
    let app = TestApp::new(ResilienceSettings::default());

    let response = app.get("/search?q=running%20shoes&k=3", "203.0.113.5").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-ratelimit-limit"), "100");
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), "99");
    assert_eq!(header_str(&response, "x-cache"), "miss");
    assert!(response.headers().get("retry-after").is_none());
    let request_id = header_str(&response, "x-request-id").to_string();

    let body = body_json(response).await;
    assert_eq!(body["cache"], "miss");
    assert_eq!(body["request_id"], request_id.as_str());
    assert_eq!(body["results"][0]["product_id"], "1001");
}

#[rstest]
#[case("/search?q=", StatusCode::BAD_REQUEST)]
#[case("/search?q=%20%20", StatusCode::BAD_REQUEST)]
#[case("/search?q=shoes&k=0", StatusCode::BAD_REQUEST)]
#[case("/search?q=shoes&k=101", StatusCode::BAD_REQUEST)]
#[case("/recommend/u-1?k=0", StatusCode::BAD_REQUEST)]
#[case("/recommend/u-1?category=outdoor", StatusCode::OK)]
#[tokio::test]
async fn test_parameter_validation(#[case] uri: &str, #[case] expected: StatusCode) {
    let app = TestApp::new(ResilienceSettings::default());
    assert_eq!(app.get(uri, "203.0.113.6").await.status(), expected);
}

#[rstest]
#[case("/search?k=abc")]
#[case("/search")]
#[case("/search?q=shoes&k=0")]
#[case("/recommend/u-1?k=0")]
#[tokio::test]
async fn test_malformed_requests_are_charged_against_quota(#[case] uri: &str) {
    let mut settings = ResilienceSettings::default();
    settings.rate_limits.search.ip = RateLimitPolicy::new(2, 2, 60);
    settings.rate_limits.recommend.ip = RateLimitPolicy::new(2, 2, 60);
    let app = TestApp::new(settings);

    for _ in 0..2 {
        assert_eq!(app.get(uri, "198.51.100.40").await.status(), StatusCode::BAD_REQUEST);
    }
    let response = app.get(uri, "198.51.100.40").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&response, "retry-after"), "60");
}

#[tokio::test]
async fn test_overlong_user_id_is_rejected() {
    let app = TestApp::new(ResilienceSettings::default());
    let uri = format!("/recommend/{}", "u".repeat(129));
    assert_eq!(app.get(&uri, "203.0.113.7").await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_request_101_is_rate_limited() {
    let app = TestApp::new(ResilienceSettings::default());

    for i in 0..100 {
        let response = app.get(&format!("/search?q=item{}", i), "198.51.100.1").await;
        assert_eq!(response.status(), StatusCode::OK, "request {} was refused", i + 1);
    }

    let response = app.get("/search?q=one-more", "198.51.100.1").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), "0");
    assert_eq!(header_str(&response, "retry-after"), "60");

    let body = body_json(response).await;
    assert_eq!(body["detail"], "Rate limit exceeded");
    assert_eq!(body["limit"], 100);

    // Quotas are per client.
    let other = app.get("/search?q=one-more", "198.51.100.2").await;
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_burst_admits_exactly_the_limit() {
    let app = Arc::new(TestApp::new(ResilienceSettings::default()));

    let responses = join_all((0..120).map(|i| {
        let app = app.clone();
        tokio::spawn(async move { app.get(&format!("/search?q=burst{}", i), "198.51.100.9").await.status() })
    }))
    .await;

    let ok = responses
        .into_iter()
        .map(|joined| joined.unwrap())
        .filter(|status| *status == StatusCode::OK)
        .count();
    assert_eq!(ok, 100);
}

#[tokio::test]
async fn test_quota_frees_up_after_window() {
    let mut settings = ResilienceSettings::default();
    settings.rate_limits.search.ip = RateLimitPolicy::new(2, 2, 60);
    let app = TestApp::new(settings);

    app.get("/search?q=a", "198.51.100.3").await;
    app.clock.advance(Duration::from_secs(20));
    app.get("/search?q=b", "198.51.100.3").await;

    let denied = app.get("/search?q=c", "198.51.100.3").await;
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&denied, "retry-after"), "40");

    app.clock.advance(Duration::from_secs(40));
    assert_eq!(app.get("/search?q=c", "198.51.100.3").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_api_key_gets_its_own_quota() {
    let mut settings = ResilienceSettings::default();
    settings.rate_limits.search.ip = RateLimitPolicy::new(1, 1, 60);
    let app = TestApp::new(settings);

    let request = || {
        Request::builder()
            .uri("/search?q=desk")
            .header("x-forwarded-for", "198.51.100.4")
            .header("x-api-key", "sk-partner-0001")
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..3 {
        let response = app.send(request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, "x-ratelimit-limit"), "1000");
    }
}

// ===== Caching =====

#[tokio::test]
async fn test_second_identical_search_is_a_cache_hit_until_expiry() {
    let app = TestApp::new(ResilienceSettings::default());
    let key = CacheKey::search("running shoes", None, 3);

    let first = app.get("/search?q=running%20shoes&k=3", "192.0.2.1").await;
    assert_eq!(header_str(&first, "x-cache"), "miss");
    app.wait_for_key(&key).await;

    // Normalization maps both spellings onto the same key.
    let second = app.get("/search?q=%20Running%20%20SHOES&k=3", "192.0.2.1").await;
    assert_eq!(header_str(&second, "x-cache"), "hit");
    assert_eq!(body_json(second).await["results"][0]["product_id"], "1001");

    app.clock.advance(Duration::from_secs(301));
    let expired = app.get("/search?q=running%20shoes&k=3", "192.0.2.1").await;
    assert_eq!(header_str(&expired, "x-cache"), "miss");
}

#[tokio::test]
async fn test_admin_invalidation_drops_cached_results() {
    let app = TestApp::new(ResilienceSettings::default());
    let key = CacheKey::search("tent", None, 10);

    app.get("/search?q=tent", "192.0.2.2").await;
    app.wait_for_key(&key).await;

    let response = app
        .admin("POST", "/admin/cache/invalidate", json!({ "pattern": "search:*" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["deleted"], 1);

    let after = app.get("/search?q=tent", "192.0.2.2").await;
    assert_eq!(header_str(&after, "x-cache"), "miss");
}

#[tokio::test]
async fn test_invalidation_event_form() {
    let app = TestApp::new(ResilienceSettings::default());
    let key = CacheKey::recommend("u-9", None, 10);

    app.get("/recommend/u-9", "192.0.2.3").await;
    app.wait_for_key(&key).await;

    let response = app
        .admin(
            "POST",
            "/admin/cache/invalidate",
            json!({ "event": { "type": "user_updated", "user_id": "u-9" } }),
        )
        .await;
    assert_eq!(body_json(response).await["deleted"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_store_degrades_to_misses_and_opens_breaker() {
    let store: Arc<dyn KeyValueStore> = Arc::new(HangingStore);
    let router = routes(AppState::new(
        store,
        Arc::new(CatalogBackend::sample()),
        ResilienceSettings::default(),
    ));
    let get = |uri: &str| {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-for", "192.0.2.50")
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..6 {
        let started = tokio::time::Instant::now();
        let response = router.clone().oneshot(get("/search?q=lamp")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, "x-cache"), "miss");
        // Quota check and cache read each give up after the operation timeout.
        assert!(started.elapsed() <= Duration::from_millis(150));
    }

    // Let the detached write-backs time out as well.
    tokio::time::sleep(Duration::from_secs(1)).await;

    let breakers = router
        .clone()
        .oneshot(get("/admin/circuit-breakers"))
        .await
        .unwrap();
    let breakers = body_json(breakers).await;
    let cache_breaker = breakers["circuit_breakers"]
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["name"] == "redis_cache")
        .unwrap()
        .clone();
    assert_eq!(cache_breaker["state"], "open");

    // With the breaker open, requests are still served without waiting on the store for the cache.
    let response = router.clone().oneshot(get("/search?q=lamp")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(router.clone().oneshot(get("/health")).await.unwrap()).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["store"]["reachable"], false);
}

// ===== Admin =====

#[tokio::test]
async fn test_blocklisted_client_gets_403_until_removed() {
    let app = TestApp::new(ResilienceSettings::default());

    let added = app
        .admin(
            "POST",
            "/admin/rate-limit/blocklist",
            json!({ "identifier": "203.0.113.99" }),
        )
        .await;
    assert_eq!(added.status(), StatusCode::OK);
    assert_eq!(
        body_json(added).await,
        json!({ "status": "added", "identifier": "203.0.113...." })
    );

    let blocked = app.get("/search?q=shoes", "203.0.113.99").await;
    assert_eq!(blocked.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(blocked).await["detail"], "Access denied");

    let removed = app
        .admin(
            "DELETE",
            "/admin/rate-limit/blocklist",
            json!({ "identifier": "203.0.113.99" }),
        )
        .await;
    assert_eq!(body_json(removed).await["status"], "removed");
    assert_eq!(app.get("/search?q=shoes", "203.0.113.99").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_blocklisted_address_stays_blocked_behind_an_api_key() {
    let app = TestApp::new(ResilienceSettings::default());
    app.admin(
        "POST",
        "/admin/rate-limit/blocklist",
        json!({ "identifier": "203.0.113.9" }),
    )
    .await;

    for key_header in ["x-api-key", "authorization"] {
        let value = if key_header == "authorization" { "Bearer made-up" } else { "made-up" };
        let response = app
            .send(
                Request::builder()
                    .uri("/search?q=shoes")
                    .header("x-forwarded-for", "203.0.113.9")
                    .header(key_header, value)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{} bypassed the blocklist", key_header);
    }

    // The same key from a clean address is served.
    let response = app
        .send(
            Request::builder()
                .uri("/search?q=shoes")
                .header("x-forwarded-for", "203.0.113.10")
                .header("x-api-key", "made-up")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_removing_unknown_entry_is_404() {
    let app = TestApp::new(ResilienceSettings::default());
    let response = app
        .admin("DELETE", "/admin/rate-limit/allowlist", json!({ "identifier": "nobody" }))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_allowlisted_client_bypasses_quota() {
    let mut settings = ResilienceSettings::default();
    settings.rate_limits.search.ip = RateLimitPolicy::new(1, 1, 60);
    let app = TestApp::new(settings);

    app.admin(
        "POST",
        "/admin/rate-limit/allowlist",
        json!({ "identifier": "10.1.1.1" }),
    )
    .await;

    for _ in 0..5 {
        assert_eq!(app.get("/search?q=chair", "10.1.1.1").await.status(), StatusCode::OK);
    }

    let status = body_json(
        app.send(
            Request::builder()
                .uri("/admin/rate-limit/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await,
    )
    .await;
    assert_eq!(status["allowlist"], json!(["10.1.1.1"]));
    assert_eq!(status["backend"], "memory");
}

#[tokio::test]
async fn test_breaker_listing_and_reset() {
    let app = TestApp::new(ResilienceSettings::default());

    let listing = body_json(
        app.send(
            Request::builder()
                .uri("/admin/circuit-breakers")
                .body(Body::empty())
                .unwrap(),
        )
        .await,
    )
    .await;
    let names: Vec<&str> = listing["circuit_breakers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["redis_cache", "search_backend"]);

    let reset = app
        .admin("POST", "/admin/circuit-breakers/redis_cache/reset", json!({}))
        .await;
    assert_eq!(reset.status(), StatusCode::OK);
    assert_eq!(body_json(reset).await["state"], "closed");

    let missing = app
        .admin("POST", "/admin/circuit-breakers/nope/reset", json!({}))
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_healthy_store() {
    let app = TestApp::new(ResilienceSettings::default());
    let body = body_json(app.get("/health", "192.0.2.9").await).await;

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], json!({ "backend": "memory", "reachable": true }));
    assert_eq!(body["circuit_breakers"].as_array().unwrap().len(), 2);
}

// ===== Abuse detection =====

#[tokio::test]
async fn test_repeated_query_is_throttled_on_the_21st_request() {
    let mut settings = ResilienceSettings::default();
    settings.abuse.action = AbuseAction::Throttle;
    let app = TestApp::new(settings);

    for _ in 0..20 {
        assert_eq!(
            app.get("/search?q=gift%20ideas", "198.51.100.20").await.status(),
            StatusCode::OK
        );
    }

    let throttled = app.get("/search?q=gift%20ideas", "198.51.100.20").await;
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&throttled, "retry-after"), "60");

    // A different query from the same client is still served.
    assert_eq!(app.get("/search?q=socks", "198.51.100.20").await.status(), StatusCode::OK);

    let status = body_json(
        app.send(
            Request::builder()
                .uri("/admin/rate-limit/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await,
    )
    .await;
    assert_eq!(status["abuse_signals"][0]["pattern"], "same_query");
}

#[tokio::test]
async fn test_sequential_user_ids_are_flagged_but_served_when_monitoring() {
    let app = TestApp::new(ResilienceSettings::default());

    for id in 1..=6 {
        let response = app.get(&format!("/recommend/user-{}", id), "198.51.100.21").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let status = body_json(
        app.send(
            Request::builder()
                .uri("/admin/rate-limit/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await,
    )
    .await;
    assert_eq!(status["abuse_signals"][0]["pattern"], "sequential_enumeration");
}
