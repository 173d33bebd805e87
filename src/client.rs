//! HTTP client facade and request pipeline.

use crate::cache::{CacheStats, Flight, HttpCache};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerStats};
use crate::config::{HttpClientConfig, HttpClientConfigBuilder};
use crate::error::{HttpClientError, Result};
use crate::interceptor::Interceptor;
use crate::request::{
    HttpRequest, MultipartForm, RequestBody, RequestBuilder, apply_query, resolve_url,
};
use crate::response::HttpResponse;
use crate::transport::{ReqwestTransport, Transport, TransportOptions};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;
use url::Url;

/// Upper bound on `Link` hints forwarded over a client's lifetime.
const MAX_LINK_HINTS: usize = 1000;

/// Length at which error body snippets are cut off.
const ERROR_BODY_LIMIT: usize = 2048;

/// HTTP client with caching, request coalescing, retry, and circuit
/// breaking.
///
/// Cloning is cheap and clones share the same cache, breaker, and
/// interceptor chain. Use [`create`](Self::create) for an instance with
/// its own state.
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    config: Arc<HttpClientConfig>,
    cache: Arc<HttpCache>,
    breaker: Arc<CircuitBreaker>,
    interceptors: Arc<RwLock<Vec<Arc<dyn Interceptor>>>>,
    hints_seen: Arc<AtomicUsize>,
}

impl HttpClient {
    /// Create a new client with the given configuration.
    pub fn new(config: HttpClientConfig) -> Self {
        let config = config.normalize();
        let transport = Arc::new(ReqwestTransport::new(&config));
        Self::from_parts(config, transport)
    }

    /// Create a new client over a custom transport.
    pub fn with_transport(config: HttpClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self::from_parts(config.normalize(), transport)
    }

    fn from_parts(config: HttpClientConfig, transport: Arc<dyn Transport>) -> Self {
        let cache = Arc::new(HttpCache::new(config.cache.clone()));
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
        Self {
            transport,
            config: Arc::new(config),
            cache,
            breaker,
            interceptors: Arc::new(RwLock::new(Vec::new())),
            hints_seen: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a new client with default configuration.
    pub fn default_client() -> Self {
        Self::new(HttpClientConfig::default())
    }

    /// Derive a new client from this one, with overrides applied to a
    /// builder seeded from the current settings. The child owns fresh
    /// cache and breaker state but shares the transport.
    pub fn create<F>(&self, configure: F) -> Self
    where
        F: FnOnce(HttpClientConfigBuilder) -> HttpClientConfigBuilder,
    {
        let builder = HttpClientConfigBuilder::from_config(self.config.as_ref().clone());
        let config = configure(builder).build().normalize();
        Self::from_parts(config, Arc::clone(&self.transport))
    }

    /// Get the client configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Register an interceptor at the end of the chain.
    pub fn use_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.write().push(interceptor);
    }

    /// Builder-style variant of [`use_interceptor`](Self::use_interceptor).
    pub fn with_interceptor(self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.use_interceptor(interceptor);
        self
    }

    /// Create a GET request builder.
    pub fn get(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::GET, url.into())
    }

    /// Create a POST request builder.
    pub fn post(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::POST, url.into())
    }

    /// Create a PUT request builder.
    pub fn put(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::PUT, url.into())
    }

    /// Create a PATCH request builder.
    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::PATCH, url.into())
    }

    /// Create a DELETE request builder.
    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::DELETE, url.into())
    }

    /// Create a HEAD request builder.
    pub fn head(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::HEAD, url.into())
    }

    /// Create an OPTIONS request builder.
    pub fn options(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::OPTIONS, url.into())
    }

    /// Create a request builder with a custom method.
    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, url.into())
    }

    /// Send a JSON body and return the decoded response body.
    pub async fn json<T, B>(&self, method: Method, url: impl Into<String>, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.request(method, url).json(body).send().await?;
        response.json()
    }

    /// Send a multipart form.
    pub async fn form(
        &self,
        method: Method,
        url: impl Into<String>,
        form: MultipartForm,
    ) -> Result<HttpResponse> {
        self.request(method, url).multipart(form).send().await
    }

    /// Drop every cached response.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Remove cached responses whose fingerprint matches `pattern` (a
    /// regex); returns the number removed.
    pub fn invalidate_cache(&self, pattern: &str) -> usize {
        self.cache.invalidate(pattern)
    }

    /// Cache occupancy snapshot.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Circuit breaker snapshot.
    pub fn circuit_breaker_stats(&self) -> CircuitBreakerStats {
        self.breaker.stats()
    }

    /// Force the circuit breaker back to closed.
    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
    }

    /// Whether the breaker is closed and below its failure threshold.
    pub fn is_healthy(&self) -> bool {
        self.breaker.stats().is_healthy
    }

    /// Run a request descriptor through the full pipeline.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let interceptors: Vec<Arc<dyn Interceptor>> = self.interceptors.read().clone();

        let mut request = request;
        for interceptor in &interceptors {
            request = match interceptor.intercept_request(request).await {
                Ok(request) => request,
                Err(error) => return Err(self.run_error_chain(&interceptors, error).await),
            };
        }

        let resolved = resolve_url(self.config.base_url.as_deref(), &request.url)?;

        let cacheable = request.method == Method::GET
            && self.config.cache.enabled
            && request.cache.unwrap_or(true);
        if !cacheable {
            let response = self
                .dispatch_guarded(&interceptors, &request, &resolved)
                .await?;
            return self.run_response_chain(&interceptors, response).await;
        }

        let fingerprint =
            self.cache
                .fingerprint(&request.method, resolved.as_str(), &request.query, &request.headers);

        match self.cache.join_flight(&fingerprint) {
            Flight::Follower(rx) => HttpCache::await_flight(rx, resolved.as_str()).await,
            Flight::Leader(guard) => {
                let outcome = self
                    .run_cacheable(&interceptors, request, &resolved, &fingerprint)
                    .await;
                guard.settle(&outcome);
                outcome
            }
        }
    }

    /// Cacheable-path body: cache lookup, conditional revalidation,
    /// dispatch, and cache write. The caller holds the in-flight guard.
    async fn run_cacheable(
        &self,
        interceptors: &[Arc<dyn Interceptor>],
        mut request: HttpRequest,
        resolved: &Url,
        fingerprint: &str,
    ) -> Result<HttpResponse> {
        if let Some(hit) = self.cache.get(fingerprint) {
            debug!(url = %resolved, "Cache hit");
            return self.run_response_chain(interceptors, hit).await;
        }

        if let Some(etag) = self.cache.etag(fingerprint)
            && let Ok(value) = HeaderValue::try_from(etag)
        {
            request.headers.insert(http::header::IF_NONE_MATCH, value);
        }

        let response = self
            .dispatch_guarded(interceptors, &request, resolved)
            .await?;

        let response = if response.status() == StatusCode::NOT_MODIFIED {
            match self.cache.refresh(fingerprint) {
                Some(cached) => cached,
                // The revalidated entry is gone (invalidated or evicted
                // meanwhile); nothing better to serve than the 304 itself.
                None => response,
            }
        } else {
            if response.ok() {
                let etag = response.etag().map(str::to_owned);
                self.cache.set(fingerprint, response.clone(), None, etag);
            }
            response
        };

        self.run_response_chain(interceptors, response).await
    }

    /// Gate the retry loop behind the circuit breaker; one breaker event
    /// per loop. An open-circuit rejection is served by the configured
    /// fallback when present.
    async fn dispatch_guarded(
        &self,
        interceptors: &[Arc<dyn Interceptor>],
        request: &HttpRequest,
        resolved: &Url,
    ) -> Result<HttpResponse> {
        let result = self
            .breaker
            .call(|| self.run_with_retry(interceptors, request, resolved))
            .await;

        match result {
            Err(HttpClientError::CircuitOpen) => {
                if let Some(fallback) = &self.config.fallback {
                    debug!(url = %resolved, "Circuit open, serving fallback");
                    Ok(fallback())
                } else {
                    Err(HttpClientError::CircuitOpen)
                }
            }
            other => other,
        }
    }

    /// Retry loop. The final (non-retried) error flows through the
    /// error-interceptor chain before it is returned.
    async fn run_with_retry(
        &self,
        interceptors: &[Arc<dyn Interceptor>],
        request: &HttpRequest,
        resolved: &Url,
    ) -> Result<HttpResponse> {
        let retry = &self.config.retry;
        let total_attempts = retry.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.dispatch_once(request, resolved).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    if attempt >= total_attempts || !retry.should_retry(&error) {
                        return Err(self.run_error_chain(interceptors, error).await);
                    }
                    let delay = retry.delay_for(&error, attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Single dispatch: build the final URL and transport options, race
    /// the transport against the timeout governor and any caller token,
    /// and type the outcome.
    async fn dispatch_once(&self, request: &HttpRequest, resolved: &Url) -> Result<HttpResponse> {
        let mut url = resolved.clone();
        apply_query(&mut url, &request.query);
        let url_text = url.to_string();

        let size = request.body.len();
        if size > self.config.max_request_size {
            return Err(HttpClientError::RequestTooLarge {
                size,
                limit: self.config.max_request_size,
            });
        }

        // A token that is already aborted never reaches the transport.
        if let Some(token) = &request.cancel
            && token.is_cancelled()
        {
            return Err(HttpClientError::Cancelled { url: url_text });
        }

        let timeout = request.timeout.unwrap_or(self.config.timeout);
        let options = TransportOptions {
            method: request.method.clone(),
            headers: self.merged_headers(request),
            body: request.body.clone(),
            timeout,
            priority: request.priority,
            max_response_size: self.config.max_response_size,
        };

        let send = self.transport.send(url, options);
        let timed = tokio::time::timeout(timeout, send);
        let wire = if let Some(token) = &request.cancel {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(HttpClientError::Cancelled {
                    url: url_text.clone(),
                }),
                outcome = timed => outcome.unwrap_or(Err(HttpClientError::Timeout {
                    url: url_text.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })),
            }
        } else {
            timed.await.unwrap_or(Err(HttpClientError::Timeout {
                url: url_text.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }))
        }?;

        let response = HttpResponse::new(wire.status, wire.headers, wire.url, wire.body)
            .with_response_type(request.response_type);
        self.observe_link_hints(&response);

        let status = response.status();
        if response.ok() || status == StatusCode::NOT_MODIFIED || status.is_redirection() {
            Ok(response)
        } else {
            let body = response.bytes();
            let snippet = (!body.is_empty()).then(|| {
                String::from_utf8_lossy(&body[..body.len().min(ERROR_BODY_LIMIT)]).into_owned()
            });
            Err(HttpClientError::Http {
                status: status.as_u16(),
                status_text: response.status_text().to_string(),
                url: url_text,
                headers: response.headers().clone(),
                body: snippet,
            })
        }
    }

    /// Instance defaults first, caller headers over them. Multipart bodies
    /// lose any Content-Type so the transport can set the boundary.
    fn merged_headers(&self, request: &HttpRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.config.default_headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(name, value);
            }
        }
        for (name, value) in &request.headers {
            headers.insert(name, value.clone());
        }
        if matches!(request.body, RequestBody::Multipart(_)) {
            headers.remove(http::header::CONTENT_TYPE);
        }
        headers
    }

    async fn run_response_chain(
        &self,
        interceptors: &[Arc<dyn Interceptor>],
        mut response: HttpResponse,
    ) -> Result<HttpResponse> {
        for interceptor in interceptors {
            response = match interceptor.intercept_response(response).await {
                Ok(response) => response,
                Err(error) => return Err(self.run_error_chain(interceptors, error).await),
            };
        }
        Ok(response)
    }

    async fn run_error_chain(
        &self,
        interceptors: &[Arc<dyn Interceptor>],
        mut error: HttpClientError,
    ) -> HttpClientError {
        for interceptor in interceptors {
            error = interceptor.intercept_error(error).await;
        }
        error
    }

    /// Forward `Link` preload/prefetch hints to the configured observer,
    /// capped over the client's lifetime.
    fn observe_link_hints(&self, response: &HttpResponse) {
        let Some(observer) = &self.config.link_hint_observer else {
            return;
        };
        for hint in response.link_hints() {
            if self.hints_seen.fetch_add(1, Ordering::Relaxed) >= MAX_LINK_HINTS {
                break;
            }
            observer(&hint);
        }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::default_client()
    }
}
