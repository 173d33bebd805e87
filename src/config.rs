//! HTTP client configuration.

use crate::cache::CacheConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::response::{HttpResponse, LinkHint};
use crate::retry::RetryConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Fallback invoked when the circuit breaker rejects a request.
pub type FallbackFn = Arc<dyn Fn() -> HttpResponse + Send + Sync>;

/// Observer receiving `Link` header preload/prefetch hints.
pub type LinkHintObserver = Arc<dyn Fn(&LinkHint) + Send + Sync>;

const MIN_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_TIMEOUT: Duration = Duration::from_secs(300);
const MIN_CACHE_TTL: Duration = Duration::from_secs(1);
const MAX_CACHE_TTL: Duration = Duration::from_secs(86_400);
const MAX_RETRY_ATTEMPTS: u32 = 10;
const MIN_RESET_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_RESET_TIMEOUT: Duration = Duration::from_secs(3_600);

/// HTTP client configuration.
///
/// Out-of-range values are clamped by [`normalize`](Self::normalize) rather
/// than rejected, so a misconfigured caller degrades to safe defaults
/// instead of failing at request time.
#[derive(Clone)]
pub struct HttpClientConfig {
    /// Base URL for relative request paths. Only kept when it parses as
    /// `http(s)://...`; a trailing slash is stripped.
    pub base_url: Option<String>,
    /// Default per-request timeout.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Response cache configuration.
    pub cache: CacheConfig,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Fallback served instead of a `CircuitOpen` rejection.
    pub fallback: Option<FallbackFn>,
    /// Default headers for all requests.
    pub default_headers: Vec<(String, String)>,
    /// User agent string.
    pub user_agent: String,
    /// Largest request body accepted for dispatch.
    pub max_request_size: usize,
    /// Largest response body read from the transport.
    pub max_response_size: usize,
    /// Enable gzip compression.
    pub gzip: bool,
    /// Enable brotli compression.
    pub brotli: bool,
    /// Follow redirects.
    pub follow_redirects: bool,
    /// Maximum redirects to follow.
    pub max_redirects: usize,
    /// Connection pool idle timeout.
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections per host.
    pub pool_max_idle_per_host: usize,
    /// Optional observer for `Link` header resource hints.
    pub link_hint_observer: Option<LinkHintObserver>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            fallback: None,
            default_headers: Vec::new(),
            user_agent: format!("bulwark-http-client/{}", env!("CARGO_PKG_VERSION")),
            max_request_size: 10 * 1024 * 1024,
            max_response_size: 50 * 1024 * 1024,
            gzip: true,
            brotli: true,
            follow_redirects: true,
            max_redirects: 10,
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
            link_hint_observer: None,
        }
    }
}

impl fmt::Debug for HttpClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("fallback", &self.fallback.as_ref().map(|_| "<fn>"))
            .field("default_headers", &self.default_headers)
            .field("user_agent", &self.user_agent)
            .field("max_request_size", &self.max_request_size)
            .field("max_response_size", &self.max_response_size)
            .field("gzip", &self.gzip)
            .field("brotli", &self.brotli)
            .field("follow_redirects", &self.follow_redirects)
            .field("max_redirects", &self.max_redirects)
            .field(
                "link_hint_observer",
                &self.link_hint_observer.as_ref().map(|_| "<fn>"),
            )
            .finish()
    }
}

impl HttpClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }

    /// Clamp and default every field into its canonical range.
    pub fn normalize(mut self) -> Self {
        self.timeout = self.timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT);
        self.cache.default_ttl = self.cache.default_ttl.clamp(MIN_CACHE_TTL, MAX_CACHE_TTL);
        self.cache.max_size = self.cache.max_size.clamp(1, 10_000);
        if self.cache.auth_headers.is_empty() {
            self.cache.auth_headers = CacheConfig::default().auth_headers;
        }
        for header in &mut self.cache.auth_headers {
            *header = header.to_ascii_lowercase();
        }

        self.retry.max_attempts = self.retry.max_attempts.min(MAX_RETRY_ATTEMPTS);
        self.circuit_breaker.failure_threshold =
            self.circuit_breaker.failure_threshold.clamp(1, 100);
        self.circuit_breaker.reset_timeout = self
            .circuit_breaker
            .reset_timeout
            .clamp(MIN_RESET_TIMEOUT, MAX_RESET_TIMEOUT);

        self.base_url = self.base_url.take().filter(|base| {
            Url::parse(base)
                .map(|u| matches!(u.scheme(), "http" | "https"))
                .unwrap_or(false)
        });
        if let Some(base) = &mut self.base_url {
            while base.ends_with('/') {
                base.pop();
            }
        }

        let has_content_type = self
            .default_headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
        if !has_content_type {
            self.default_headers
                .push(("Content-Type".to_string(), "application/json".to_string()));
        }

        self
    }
}

/// Builder for HTTP client configuration.
#[derive(Debug, Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    /// Seed a builder from an existing configuration.
    pub(crate) fn from_config(config: HttpClientConfig) -> Self {
        Self { config }
    }

    /// Set the base URL for all requests.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the default request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set cache configuration.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.config.cache = config;
        self
    }

    /// Set retry configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.config.retry = config;
        self
    }

    /// Set circuit breaker configuration.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    /// Serve this fallback instead of rejecting when the circuit is open.
    pub fn fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn() -> HttpResponse + Send + Sync + 'static,
    {
        self.config.fallback = Some(Arc::new(fallback));
        self
    }

    /// Add a default header for all requests.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .default_headers
            .push((name.into(), value.into()));
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the maximum accepted request body size.
    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.config.max_request_size = bytes;
        self
    }

    /// Set the maximum response body size read from the transport.
    pub fn max_response_size(mut self, bytes: usize) -> Self {
        self.config.max_response_size = bytes;
        self
    }

    /// Enable or disable gzip compression.
    pub fn gzip(mut self, enable: bool) -> Self {
        self.config.gzip = enable;
        self
    }

    /// Enable or disable brotli compression.
    pub fn brotli(mut self, enable: bool) -> Self {
        self.config.brotli = enable;
        self
    }

    /// Enable or disable following redirects.
    pub fn follow_redirects(mut self, enable: bool) -> Self {
        self.config.follow_redirects = enable;
        self
    }

    /// Set the maximum number of redirects to follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Set the connection pool idle timeout.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum idle connections per host.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Receive `Link` header preload/prefetch hints from responses.
    pub fn link_hint_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&LinkHint) + Send + Sync + 'static,
    {
        self.config.link_hint_observer = Some(Arc::new(observer));
        self
    }

    /// Build the configuration.
    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}
