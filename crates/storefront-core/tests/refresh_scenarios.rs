//! End-to-end refresh behaviour against a mock backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use storefront_core::config::RefreshMethod;
use storefront_core::{ApiClient, ApiError, ClientConfig, Credential, CredentialStore};
use wiremock::matchers::{body_json, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REFRESH_PATH: &str = "/auth/refresh";

struct Harness {
    server: MockServer,
    client: ApiClient,
    reauth: Arc<AtomicUsize>,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(tweak: impl FnOnce(&mut ClientConfig)) -> Self {
        let server = MockServer::start().await;
        let mut config = ClientConfig::new(server.uri());
        config.refresh_timeout_secs = 2;
        tweak(&mut config);

        let reauth = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reauth);
        let client = ApiClient::builder(config)
            .store(CredentialStore::in_memory())
            .on_reauth(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .expect("client builds");

        Self {
            server,
            client,
            reauth,
        }
    }

    fn reauth_calls(&self) -> usize {
        self.reauth.load(Ordering::SeqCst)
    }

    async fn mount_refresh(&self, response: ResponseTemplate, times: u64) {
        Mock::given(method("GET"))
            .and(path(REFRESH_PATH))
            .respond_with(response)
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// `GET path` answers `status` when called with `token`
    async fn mount_get(&self, route: &str, token: &str, response: ResponseTemplate, times: u64) {
        Mock::given(method("GET"))
            .and(path(route))
            .and(header("authorization", format!("Bearer {}", token).as_str()))
            .respond_with(response)
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Paths of requests the server saw carrying `token`, in arrival order
    async fn paths_with_token(&self, token: &str) -> Vec<String> {
        let expected = format!("Bearer {}", token);
        self.server
            .received_requests()
            .await
            .expect("request recording enabled")
            .into_iter()
            .filter(|r| {
                r.headers
                    .get("authorization")
                    .is_some_and(|v| v.to_str().ok() == Some(expected.as_str()))
            })
            .map(|r| r.url.path().to_string())
            .collect()
    }
}

fn fresh_token() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "access_token": "fresh" }))
}

async fn wait_for_queue(client: &ApiClient, depth: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while client.queued_requests() < depth {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("request was not queued in time");
}

#[tokio::test]
async fn test_single_caller_is_replayed_after_refresh() {
    let h = Harness::start().await;
    h.mount_get("/products", "stale", ResponseTemplate::new(401), 1).await;
    h.mount_get(
        "/products",
        "fresh",
        ResponseTemplate::new(200).set_body_json(json!([{ "id": 1, "name": "Mug" }])),
        1,
    )
    .await;
    h.mount_refresh(fresh_token(), 1).await;

    h.client.login(Credential::new("stale"));
    let products: Vec<Value> = h.client.get_json("/products").await.expect("replay succeeds");

    assert_eq!(products[0]["name"], "Mug");
    assert_eq!(h.client.credentials().get(), Some(Credential::new("fresh")));
    assert!(!h.client.is_refreshing());
    assert_eq!(h.client.queued_requests(), 0);
    assert_eq!(h.reauth_calls(), 0);

    // The refresh call relies on its cookie, not the bearer header
    let requests = h.server.received_requests().await.expect("recording");
    let refresh = requests
        .iter()
        .find(|r| r.url.path() == REFRESH_PATH)
        .expect("refresh was called");
    assert!(refresh.headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_concurrent_failures_share_one_refresh() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/items/\d+$"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(5)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/items/\d+$"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(5)
        .mount(&h.server)
        .await;
    h.mount_refresh(fresh_token().set_delay(Duration::from_millis(300)), 1)
        .await;

    h.client.login(Credential::new("stale"));

    let mut handles = Vec::new();
    for i in 0..5 {
        let client = h.client.clone();
        handles.push(tokio::spawn(async move {
            client.get_json::<Value>(&format!("/items/{}", i)).await
        }));
        // One arrival at a time so queue order is known
        wait_for_queue(&h.client, i + 1).await;
        assert!(h.client.is_refreshing());
    }

    for handle in handles {
        let body = handle.await.expect("task").expect("replay succeeds");
        assert_eq!(body["ok"], true);
    }

    let mut replayed = h.paths_with_token("fresh").await;
    replayed.sort();
    assert_eq!(
        replayed,
        vec!["/items/0", "/items/1", "/items/2", "/items/3", "/items/4"]
    );
    assert!(!h.client.is_refreshing());
    assert_eq!(h.client.queued_requests(), 0);
}

#[tokio::test]
async fn test_refresh_rejection_is_terminal() {
    let h = Harness::start().await;
    h.mount_get("/orders", "stale", ResponseTemplate::new(401), 1).await;
    h.mount_refresh(ResponseTemplate::new(401), 1).await;

    h.client.login(Credential::new("stale"));
    let err = h.client.get("/orders").await.expect_err("refresh fails");

    assert!(err.refresh_cause().is_some_and(ApiError::is_unauthorized));
    assert!(h.client.credentials().get().is_none());
    assert!(!h.client.is_refreshing());
    assert_eq!(h.client.queued_requests(), 0);
    assert_eq!(h.reauth_calls(), 1);
}

#[tokio::test]
async fn test_refresh_failure_rejects_every_waiter_once() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/cart/\d+$"))
        .respond_with(ResponseTemplate::new(401))
        .expect(3)
        .mount(&h.server)
        .await;
    h.mount_refresh(
        ResponseTemplate::new(500).set_delay(Duration::from_millis(200)),
        1,
    )
    .await;

    h.client.login(Credential::new("stale"));

    let mut handles = Vec::new();
    for i in 0..3 {
        let client = h.client.clone();
        handles.push(tokio::spawn(async move {
            client.get(&format!("/cart/{}", i)).await
        }));
        wait_for_queue(&h.client, i + 1).await;
    }

    for handle in handles {
        let err = handle.await.expect("task").expect_err("rejected");
        // Each waiter sees the refresh error, not its own 401
        assert!(matches!(err.refresh_cause(), Some(ApiError::ServerError(_))));
    }
    assert_eq!(h.reauth_calls(), 1);
    assert!(h.client.credentials().get().is_none());
}

#[tokio::test]
async fn test_refresh_endpoint_failure_is_not_coordinated() {
    let h = Harness::start().await;
    h.mount_refresh(ResponseTemplate::new(401), 1).await;
    h.mount_get(
        "/catalog",
        "valid",
        ResponseTemplate::new(200).set_body_json(json!([])),
        1,
    )
    .await;

    h.client.login(Credential::new("valid"));

    let (direct, unrelated) = tokio::join!(h.client.get(REFRESH_PATH), h.client.get("/catalog"));

    assert!(matches!(direct, Err(ApiError::Unauthorized)));
    assert!(unrelated.is_ok());
    assert!(!h.client.is_refreshing());
    assert_eq!(h.client.credentials().get(), Some(Credential::new("valid")));
    assert_eq!(h.reauth_calls(), 0);
}

#[tokio::test]
async fn test_sequential_episodes_refresh_independently() {
    let h = Harness::start().await;
    h.mount_get("/profile", "stale", ResponseTemplate::new(401), 2).await;
    h.mount_get("/profile", "fresh", ResponseTemplate::new(200), 2).await;
    h.mount_refresh(fresh_token(), 2).await;

    for _ in 0..2 {
        h.client.login(Credential::new("stale"));
        h.client.get("/profile").await.expect("episode succeeds");
        assert!(!h.client.is_refreshing());
    }
}

#[tokio::test]
async fn test_transient_failure_skips_refresh() {
    let h = Harness::start().await;
    h.mount_get("/blog", "valid", ResponseTemplate::new(503).set_body_string("maintenance"), 1)
        .await;
    h.mount_refresh(fresh_token(), 0).await;

    h.client.login(Credential::new("valid"));
    let err = h.client.get("/blog").await.expect_err("server error");

    assert!(matches!(err, ApiError::ServerError(body) if body == "maintenance"));
    assert!(!h.client.is_refreshing());
}

#[tokio::test]
async fn test_anonymous_request_has_no_authorization() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/public/banners"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;

    h.client.get("/public/banners").await.expect("public endpoint");

    let requests = h.server.received_requests().await.expect("recording");
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_failed_replay_is_not_retried() {
    let h = Harness::start().await;
    h.mount_get("/admin/users", "stale", ResponseTemplate::new(401), 1).await;
    h.mount_get("/admin/users", "fresh", ResponseTemplate::new(403).set_body_string("admins only"), 1)
        .await;
    h.mount_refresh(fresh_token(), 1).await;

    h.client.login(Credential::new("stale"));
    let err = h.client.get("/admin/users").await.expect_err("replay denied");

    assert!(matches!(err, ApiError::AccessDenied(_)));
    assert_eq!(h.reauth_calls(), 0);
}

#[tokio::test]
async fn test_replay_rejected_again_returns_unauthorized() {
    let h = Harness::start().await;
    h.mount_get("/wishlist", "stale", ResponseTemplate::new(401), 1).await;
    h.mount_get("/wishlist", "fresh", ResponseTemplate::new(401), 1).await;
    h.mount_refresh(fresh_token(), 1).await;

    h.client.login(Credential::new("stale"));
    let err = h.client.get("/wishlist").await.expect_err("still unauthorized");

    assert!(err.is_unauthorized());
    assert!(!h.client.is_refreshing());
}

#[tokio::test]
async fn test_replay_keeps_method_and_body() {
    let h = Harness::start().await;
    let coupon = json!({ "code": "SPRING10", "percent": 10 });
    Mock::given(method("POST"))
        .and(path("/coupons"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/coupons"))
        .and(header("authorization", "Bearer fresh"))
        .and(body_json(&coupon))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 7 })))
        .expect(1)
        .mount(&h.server)
        .await;
    h.mount_refresh(fresh_token(), 1).await;

    h.client.login(Credential::new("stale"));
    let created: Value = h.client.post_json("/coupons", &coupon).await.expect("created");

    assert_eq!(created["id"], 7);
}

#[tokio::test]
async fn test_refresh_timeout_is_a_refresh_failure() {
    let h = Harness::start_with(|config| config.refresh_timeout_secs = 1).await;
    h.mount_get("/checkout", "stale", ResponseTemplate::new(401), 1).await;
    h.mount_refresh(fresh_token().set_delay(Duration::from_secs(3)), 1)
        .await;

    h.client.login(Credential::new("stale"));
    let err = h.client.get("/checkout").await.expect_err("timed out");

    assert!(matches!(err.refresh_cause(), Some(ApiError::RefreshTimeout(_))));
    assert!(h.client.credentials().get().is_none());
    assert_eq!(h.reauth_calls(), 1);
}

#[tokio::test]
async fn test_refresh_without_token_is_a_refresh_failure() {
    let h = Harness::start().await;
    h.mount_get("/orders", "stale", ResponseTemplate::new(401), 1).await;
    h.mount_refresh(ResponseTemplate::new(200).set_body_json(json!({})), 1)
        .await;

    h.client.login(Credential::new("stale"));
    let err = h.client.get("/orders").await.expect_err("no token");

    assert!(matches!(err.refresh_cause(), Some(ApiError::InvalidResponse(_))));
    assert_eq!(h.reauth_calls(), 1);
}

#[tokio::test]
async fn test_post_refresh_method() {
    let h = Harness::start_with(|config| config.refresh_method = RefreshMethod::Post).await;
    h.mount_get("/orders", "stale", ResponseTemplate::new(401), 1).await;
    h.mount_get("/orders", "fresh", ResponseTemplate::new(200), 1).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(fresh_token())
        .expect(1)
        .mount(&h.server)
        .await;

    h.client.login(Credential::new("stale"));
    h.client.get("/orders").await.expect("replayed");
}

#[tokio::test]
async fn test_dropped_leader_does_not_strand_queue() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/reviews/\d+$"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/reviews/\d+$"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&h.server)
        .await;
    h.mount_refresh(fresh_token().set_delay(Duration::from_millis(300)), 1)
        .await;

    h.client.login(Credential::new("stale"));

    let leader = {
        let client = h.client.clone();
        tokio::spawn(async move { client.get("/reviews/1").await })
    };
    wait_for_queue(&h.client, 1).await;
    leader.abort();

    let follower = {
        let client = h.client.clone();
        tokio::spawn(async move { client.get("/reviews/2").await })
    };
    wait_for_queue(&h.client, 2).await;

    follower
        .await
        .expect("task")
        .expect("follower replayed despite leader cancellation");
}
