//! # Bulwark HTTP Client
//!
//! A resilient HTTP client that wraps a pluggable transport with the
//! machinery production callers need: response caching with ETag
//! revalidation, in-flight request coalescing, retry with jittered
//! backoff and `Retry-After` pacing, a circuit breaker, interceptors,
//! and cancellation/timeout control.
//!
//! ## Features
//!
//! - **Response Cache**: Bounded LRU with per-principal isolation and 304
//!   revalidation
//! - **Request Coalescing**: Concurrent identical GETs share one dispatch
//! - **Retry with Backoff**: Jittered exponential delays, server-directed
//!   pacing via `Retry-After`
//! - **Circuit Breaker**: Prevents cascade failures with automatic recovery
//! - **Interceptors**: Request/response/error transformation and logging
//! - **Pluggable Transport**: `reqwest`-backed by default, swappable for
//!   tests and embedders
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bulwark_http_client::{HttpClient, HttpClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpClient::new(HttpClientConfig::default());
//!
//!     let response = client
//!         .get("https://api.example.com/users")
//!         .send()
//!         .await?;
//!
//!     println!("Status: {}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! ## With Retry and Circuit Breaker
//!
//! ```rust,no_run
//! use bulwark_http_client::{
//!     CircuitBreakerConfig, HttpClient, HttpClientConfig, RetryConfig,
//! };
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HttpClientConfig::builder()
//!         .base_url("https://api.example.com")
//!         .timeout(Duration::from_secs(30))
//!         .retry(RetryConfig::exponential(3, Duration::from_millis(100)))
//!         .circuit_breaker(CircuitBreakerConfig::new(5, Duration::from_secs(60)))
//!         .build();
//!
//!     let client = HttpClient::new(config);
//!
//!     // Requests retry automatically; repeated failures open the circuit.
//!     let response = client
//!         .post("/orders")
//!         .json(&serde_json::json!({"item": "widget", "quantity": 5}))
//!         .send()
//!         .await?;
//!
//!     println!("Created: {}", response.status());
//!     Ok(())
//! }
//! ```

mod cache;
mod circuit_breaker;
mod client;
mod config;
mod error;
mod interceptor;
mod request;
mod response;
mod retry;
mod transport;

pub use cache::{CacheConfig, CacheStats};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
pub use client::HttpClient;
pub use config::{FallbackFn, HttpClientConfig, HttpClientConfigBuilder, LinkHintObserver};
pub use error::{HttpClientError, Result};
pub use interceptor::{AuthInterceptor, Interceptor, LoggingInterceptor};
pub use request::{
    CancelToken, HttpRequest, MultipartForm, MultipartPart, PartValue, Priority, RequestBody,
    RequestBuilder,
};
pub use response::{DecodedBody, HttpResponse, LinkHint, LinkRel, ResponseType};
pub use retry::{BackoffStrategy, RetryCondition, RetryConfig, parse_retry_after};
pub use transport::{ReqwestTransport, Transport, TransportOptions, TransportResponse};

// Re-export common types
pub use bytes::Bytes;
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use bulwark_http_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cache::{CacheConfig, CacheStats};
    pub use crate::circuit_breaker::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
    };
    pub use crate::client::HttpClient;
    pub use crate::config::{HttpClientConfig, HttpClientConfigBuilder};
    pub use crate::error::{HttpClientError, Result};
    pub use crate::interceptor::{AuthInterceptor, Interceptor, LoggingInterceptor};
    pub use crate::request::{
        CancelToken, HttpRequest, MultipartForm, Priority, RequestBody, RequestBuilder,
    };
    pub use crate::response::{DecodedBody, HttpResponse, ResponseType};
    pub use crate::retry::{BackoffStrategy, RetryConfig};
    pub use crate::transport::{Transport, TransportOptions, TransportResponse};
    pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
}
