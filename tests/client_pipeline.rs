//! End-to-end pipeline tests over stub transports.

use async_trait::async_trait;
use bulwark_http_client::{
    Bytes, CacheConfig, CancelToken, CircuitBreakerConfig, HeaderMap, HttpClient,
    HttpClientConfig, HttpClientConfigBuilder, HttpClientError, HttpRequest, HttpResponse, Method,
    Result, RetryConfig, StatusCode, Transport, TransportOptions, TransportResponse, Url,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One scripted wire response.
#[derive(Clone)]
struct StubResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl StubResponse {
    fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string(),
        }
    }

    fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Scripted transport: plays responses front-to-back, repeating the last
/// one, and records every dispatch.
struct StubTransport {
    dispatches: AtomicUsize,
    script: Mutex<Vec<StubResponse>>,
    seen_headers: Mutex<Vec<HeaderMap>>,
    delay: Duration,
    hang: bool,
}

impl StubTransport {
    fn returning(response: StubResponse) -> Arc<Self> {
        Self::sequence(vec![response])
    }

    fn sequence(script: Vec<StubResponse>) -> Arc<Self> {
        Arc::new(Self {
            dispatches: AtomicUsize::new(0),
            script: Mutex::new(script),
            seen_headers: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            hang: false,
        })
    }

    fn delayed(response: StubResponse, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            dispatches: AtomicUsize::new(0),
            script: Mutex::new(vec![response]),
            seen_headers: Mutex::new(Vec::new()),
            delay,
            hang: false,
        })
    }

    fn hanging() -> Arc<Self> {
        Arc::new(Self {
            dispatches: AtomicUsize::new(0),
            script: Mutex::new(Vec::new()),
            seen_headers: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            hang: true,
        })
    }

    fn dispatch_count(&self) -> usize {
        self.dispatches.load(Ordering::SeqCst)
    }

    fn last_headers(&self) -> HeaderMap {
        self.seen_headers.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&self, url: Url, options: TransportOptions) -> Result<TransportResponse> {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        self.seen_headers.lock().unwrap().push(options.headers);

        if self.hang {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let step = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &step.headers {
            headers.append(
                http::header::HeaderName::try_from(name.as_str()).unwrap(),
                value.parse().unwrap(),
            );
        }
        Ok(TransportResponse {
            status: StatusCode::from_u16(step.status).unwrap(),
            headers,
            url,
            body: Bytes::from(step.body),
        })
    }
}

fn client_with<F>(transport: Arc<StubTransport>, configure: F) -> HttpClient
where
    F: FnOnce(HttpClientConfigBuilder) -> HttpClientConfigBuilder,
{
    let builder = HttpClientConfig::builder().base_url("https://api.test");
    HttpClient::with_transport(configure(builder).build(), transport)
}

#[tokio::test]
async fn cache_hit_dispatches_once() {
    let transport = StubTransport::returning(StubResponse::json(200, r#"{"x":1}"#));
    let client = client_with(transport.clone(), |b| b);

    let first = client.get("/a").send().await.unwrap();
    assert!(!first.from_cache());
    assert_eq!(first.json::<serde_json::Value>().unwrap()["x"], 1);
    assert_eq!(transport.dispatch_count(), 1);

    let second = client.get("/a").send().await.unwrap();
    assert!(second.from_cache());
    assert_eq!(second.json::<serde_json::Value>().unwrap()["x"], 1);
    assert_eq!(transport.dispatch_count(), 1);
}

#[tokio::test]
async fn cache_opt_out_dispatches_every_time() {
    let transport = StubTransport::returning(StubResponse::json(200, "{}"));
    let client = client_with(transport.clone(), |b| b);

    client.get("/a").cache(false).send().await.unwrap();
    client.get("/a").cache(false).send().await.unwrap();
    assert_eq!(transport.dispatch_count(), 2);
}

#[tokio::test]
async fn concurrent_identical_gets_coalesce() {
    let transport = StubTransport::delayed(
        StubResponse::json(200, r#"{"v":"shared"}"#),
        Duration::from_millis(100),
    );
    let client = client_with(transport.clone(), |b| b);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let client = client.clone();
        handles.push(tokio::spawn(
            async move { client.get("/b").send().await },
        ));
    }

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.json::<serde_json::Value>().unwrap()["v"], "shared");
    }
    assert_eq!(transport.dispatch_count(), 1);
    assert_eq!(client.cache_stats().in_flight, 0);
}

#[tokio::test]
async fn coalesced_callers_share_errors() {
    let transport = StubTransport::delayed(StubResponse::status(500), Duration::from_millis(100));
    let client = client_with(transport.clone(), |b| b.retry(RetryConfig::immediate(1)));

    let (a, b) = tokio::join!(client.get("/err").send(), client.get("/err").send());
    assert_eq!(transport.dispatch_count(), 1);
    for outcome in [a, b] {
        match outcome.unwrap_err() {
            HttpClientError::Http { status, .. } => assert_eq!(status, 500),
            other => panic!("unexpected error: {other}"),
        }
    }
}

#[tokio::test]
async fn retry_after_paces_429_retries() {
    let transport = StubTransport::sequence(vec![
        StubResponse::status(429).with_header("retry-after", "1"),
        StubResponse::status(429).with_header("retry-after", "1"),
        StubResponse::json(200, "{}"),
    ]);
    let client = client_with(transport.clone(), |b| b);

    let started = Instant::now();
    let response = client.get("/retry").send().await.unwrap();
    assert!(response.ok());
    assert_eq!(transport.dispatch_count(), 3);
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn breaker_opens_and_recovers() {
    let transport = StubTransport::sequence(vec![
        StubResponse::status(500),
        StubResponse::status(500),
        StubResponse::json(200, "{}"),
    ]);
    // Reset timeouts are clamped to at least one second by normalization.
    let client = client_with(transport.clone(), |b| {
        b.retry(RetryConfig::immediate(1))
            .circuit_breaker(CircuitBreakerConfig::new(2, Duration::from_secs(1)))
    });

    for _ in 0..2 {
        let error = client.get("/c").send().await.unwrap_err();
        assert!(matches!(error, HttpClientError::Http { status: 500, .. }));
    }
    assert!(!client.is_healthy());

    // Open circuit rejects without touching the transport.
    let error = client.get("/c").send().await.unwrap_err();
    assert!(matches!(error, HttpClientError::CircuitOpen));
    assert_eq!(transport.dispatch_count(), 2);

    // After the cooldown a probe goes through and closes the circuit.
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let response = client.get("/c").send().await.unwrap();
    assert!(response.ok());
    assert!(client.is_healthy());
}

#[tokio::test]
async fn breaker_fallback_served_when_open() {
    let transport = StubTransport::returning(StubResponse::status(500));
    let client = client_with(transport.clone(), |b| {
        b.retry(RetryConfig::immediate(1))
            .circuit_breaker(CircuitBreakerConfig::new(1, Duration::from_secs(60)))
            .fallback(|| {
                HttpResponse::new(
                    StatusCode::OK,
                    HeaderMap::new(),
                    Url::parse("https://api.test/fallback").unwrap(),
                    Bytes::from_static(b"{\"fallback\":true}"),
                )
            })
    });

    let _ = client.get("/c").cache(false).send().await.unwrap_err();

    let response = client.get("/c").cache(false).send().await.unwrap();
    assert_eq!(
        response.json::<serde_json::Value>().unwrap()["fallback"],
        true
    );
    assert_eq!(transport.dispatch_count(), 1);
}

#[tokio::test]
async fn auth_headers_isolate_cache_entries() {
    let transport = StubTransport::sequence(vec![
        StubResponse::json(200, r#"{"who":"a"}"#),
        StubResponse::json(200, r#"{"who":"b"}"#),
    ]);
    let client = client_with(transport.clone(), |b| b);

    let a = client
        .get("/d")
        .header("Authorization", "Bearer A")
        .send()
        .await
        .unwrap();
    assert_eq!(a.json::<serde_json::Value>().unwrap()["who"], "a");

    let b = client
        .get("/d")
        .header("Authorization", "Bearer B")
        .send()
        .await
        .unwrap();
    assert_eq!(b.json::<serde_json::Value>().unwrap()["who"], "b");
    assert_eq!(transport.dispatch_count(), 2);

    // Each principal sees its own cached body.
    let a_again = client
        .get("/d")
        .header("Authorization", "Bearer A")
        .send()
        .await
        .unwrap();
    assert!(a_again.from_cache());
    assert_eq!(a_again.json::<serde_json::Value>().unwrap()["who"], "a");
    assert_eq!(transport.dispatch_count(), 2);
}

#[tokio::test]
async fn cancellation_releases_in_flight_entry() {
    let transport = StubTransport::hanging();
    let client = client_with(transport.clone(), |b| b);

    let token = CancelToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let error = client
        .get("/e")
        .cancel_token(token)
        .send()
        .await
        .unwrap_err();
    assert!(matches!(error, HttpClientError::Cancelled { .. }));
    assert!(started.elapsed() <= Duration::from_millis(50));
    assert_eq!(client.cache_stats().in_flight, 0);
    assert_eq!(transport.dispatch_count(), 1);
}

#[tokio::test]
async fn already_cancelled_token_aborts_before_dispatch() {
    let transport = StubTransport::returning(StubResponse::json(200, "{}"));
    let client = client_with(transport.clone(), |b| b);

    let token = CancelToken::new();
    token.cancel();

    let error = client
        .get("/e")
        .cancel_token(token)
        .send()
        .await
        .unwrap_err();
    assert!(matches!(error, HttpClientError::Cancelled { .. }));
    assert_eq!(transport.dispatch_count(), 0);
}

#[tokio::test]
async fn zero_timeout_fails_fast() {
    let transport = StubTransport::hanging();
    let client = client_with(transport, |b| b.retry(RetryConfig::immediate(1)));

    let started = Instant::now();
    let error = client
        .get("/slow")
        .timeout(Duration::ZERO)
        .send()
        .await
        .unwrap_err();
    assert!(error.is_timeout());
    assert!(started.elapsed() <= Duration::from_millis(50));
}

#[tokio::test]
async fn etag_revalidation_serves_cached_body() {
    let transport = StubTransport::sequence(vec![
        StubResponse::json(200, r#"{"x":1}"#).with_header("etag", "\"v1\""),
        StubResponse::status(304),
    ]);
    let client = client_with(transport.clone(), |b| {
        b.cache(CacheConfig {
            default_ttl: Duration::from_secs(1),
            ..Default::default()
        })
    });

    let first = client.get("/tagged").send().await.unwrap();
    assert!(!first.from_cache());
    assert_eq!(first.etag(), Some("\"v1\""));

    // Let the entry expire, then revalidate.
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let second = client.get("/tagged").send().await.unwrap();
    assert_eq!(transport.dispatch_count(), 2);
    assert_eq!(
        transport.last_headers().get("if-none-match").unwrap(),
        "\"v1\""
    );
    assert!(second.from_cache());
    assert_eq!(second.json::<serde_json::Value>().unwrap()["x"], 1);

    // The refreshed entry serves without another dispatch.
    let third = client.get("/tagged").send().await.unwrap();
    assert!(third.from_cache());
    assert_eq!(transport.dispatch_count(), 2);
}

#[tokio::test]
async fn exhausted_retries_dispatch_exactly_max_attempts() {
    let transport = StubTransport::returning(StubResponse::status(500));
    let client = client_with(transport.clone(), |b| b.retry(RetryConfig::immediate(3)));

    let error = client.post("/f").send().await.unwrap_err();
    assert!(matches!(error, HttpClientError::Http { status: 500, .. }));
    assert_eq!(transport.dispatch_count(), 3);
}

#[tokio::test]
async fn zero_attempts_still_dispatches_once() {
    let transport = StubTransport::returning(StubResponse::status(500));
    let client = client_with(transport.clone(), |b| b.retry(RetryConfig::immediate(0)));

    let _ = client.post("/f").send().await.unwrap_err();
    assert_eq!(transport.dispatch_count(), 1);
}

#[tokio::test]
async fn non_retryable_status_fails_without_retry() {
    let transport = StubTransport::returning(StubResponse::status(404));
    let client = client_with(transport.clone(), |b| b.retry(RetryConfig::immediate(5)));

    let error = client.post("/missing").send().await.unwrap_err();
    assert!(matches!(error, HttpClientError::Http { status: 404, .. }));
    assert_eq!(transport.dispatch_count(), 1);
}

#[tokio::test]
async fn default_headers_merge_under_caller_headers() {
    let transport = StubTransport::returning(StubResponse::json(200, "{}"));
    let client = client_with(transport.clone(), |b| {
        b.default_header("X-Service", "billing")
    });

    client
        .post("/g")
        .header("X-Service", "checkout")
        .send()
        .await
        .unwrap();

    let headers = transport.last_headers();
    assert_eq!(headers.get("x-service").unwrap(), "checkout");
    assert_eq!(headers.get("content-type").unwrap(), "application/json");
}

#[tokio::test]
async fn interceptors_run_in_registration_order() {
    use bulwark_http_client::Interceptor;

    struct Tag(&'static str, Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl Interceptor for Tag {
        async fn intercept_request(&self, request: HttpRequest) -> Result<HttpRequest> {
            self.1.lock().unwrap().push(self.0);
            Ok(request)
        }
    }

    let order = Arc::new(Mutex::new(Vec::new()));
    let transport = StubTransport::returning(StubResponse::json(200, "{}"));
    let client = client_with(transport, |b| b)
        .with_interceptor(Arc::new(Tag("first", order.clone())))
        .with_interceptor(Arc::new(Tag("second", order.clone())));

    client.get("/h").send().await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test]
async fn request_interceptor_rewrites_headers() {
    use bulwark_http_client::AuthInterceptor;

    let transport = StubTransport::returning(StubResponse::json(200, "{}"));
    let client = client_with(transport.clone(), |b| b)
        .with_interceptor(Arc::new(AuthInterceptor::bearer("sekrit")));

    client.get("/i").send().await.unwrap();
    assert_eq!(
        transport.last_headers().get("authorization").unwrap(),
        "Bearer sekrit"
    );
}

#[tokio::test]
async fn error_interceptor_replaces_final_error() {
    use bulwark_http_client::Interceptor;

    struct Remap;

    #[async_trait]
    impl Interceptor for Remap {
        async fn intercept_error(&self, error: HttpClientError) -> HttpClientError {
            match error {
                HttpClientError::Http { status, .. } => {
                    HttpClientError::RequestBuild(format!("upstream said {status}"))
                }
                other => other,
            }
        }
    }

    let transport = StubTransport::returning(StubResponse::status(503));
    let client = client_with(transport.clone(), |b| b.retry(RetryConfig::immediate(2)))
        .with_interceptor(Arc::new(Remap));

    let error = client.post("/j").send().await.unwrap_err();
    match error {
        HttpClientError::RequestBuild(message) => assert_eq!(message, "upstream said 503"),
        other => panic!("unexpected error: {other}"),
    }
    // The chain runs on the final error only, not per attempt.
    assert_eq!(transport.dispatch_count(), 2);
}

#[tokio::test]
async fn multipart_body_strips_content_type() {
    use bulwark_http_client::MultipartForm;

    let transport = StubTransport::returning(StubResponse::json(200, "{}"));
    let client = client_with(transport.clone(), |b| b);

    let form = MultipartForm::from_pairs([("name", Some("alice")), ("missing", None)]);
    client
        .form(Method::POST, "/upload", form)
        .await
        .unwrap();

    // The transport owns the boundary; no caller Content-Type survives.
    assert!(transport.last_headers().get("content-type").is_none());
}

#[tokio::test]
async fn oversized_request_body_rejected_before_dispatch() {
    let transport = StubTransport::returning(StubResponse::json(200, "{}"));
    let client = client_with(transport.clone(), |b| b.max_request_size(8));

    let error = client
        .post("/k")
        .body(Bytes::from(vec![0u8; 64]))
        .send()
        .await
        .unwrap_err();
    assert!(matches!(error, HttpClientError::RequestTooLarge { .. }));
    assert_eq!(transport.dispatch_count(), 0);
}

#[tokio::test]
async fn invalidate_cache_by_pattern() {
    let transport = StubTransport::returning(StubResponse::json(200, "{}"));
    let client = client_with(transport.clone(), |b| b);

    client.get("/users/1").send().await.unwrap();
    client.get("/posts/1").send().await.unwrap();
    assert_eq!(client.cache_stats().size, 2);

    assert_eq!(client.invalidate_cache("users"), 1);
    client.get("/users/1").send().await.unwrap();
    assert_eq!(transport.dispatch_count(), 3);

    client.clear_cache();
    assert_eq!(client.cache_stats().size, 0);
}

#[tokio::test]
async fn json_helper_returns_decoded_body() {
    #[derive(serde::Deserialize)]
    struct Created {
        id: u64,
    }

    let transport = StubTransport::returning(StubResponse::json(201, r#"{"id":7}"#));
    let client = client_with(transport.clone(), |b| b);

    let created: Created = client
        .json(Method::POST, "/things", &serde_json::json!({"name": "x"}))
        .await
        .unwrap();
    assert_eq!(created.id, 7);
    assert_eq!(
        transport.last_headers().get("content-type").unwrap(),
        "application/json"
    );
}

#[tokio::test]
async fn link_hints_forwarded_to_observer() {
    let hints = Arc::new(Mutex::new(Vec::new()));
    let sink = hints.clone();

    let transport = StubTransport::returning(
        StubResponse::json(200, "{}")
            .with_header("link", "</app.js>; rel=preload, </later>; rel=prefetch"),
    );
    let client = client_with(transport, |b| {
        b.link_hint_observer(move |hint| sink.lock().unwrap().push(hint.url.clone()))
    });

    client.get("/page").send().await.unwrap();
    assert_eq!(*hints.lock().unwrap(), vec!["/app.js", "/later"]);
}
