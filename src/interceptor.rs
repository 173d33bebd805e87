//! Request, response, and error interceptors.

use crate::error::{HttpClientError, Result};
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use async_trait::async_trait;

/// Hooks observing and transforming pipeline traffic.
///
/// Interceptors run strictly in registration order; the value returned by
/// one is the input of the next. An `Err` from a request or response hook
/// aborts the chain and becomes the active error without being retried.
/// For errors, the returned value replaces the active error.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Observe or rewrite the request before the pipeline acts on it.
    async fn intercept_request(&self, request: HttpRequest) -> Result<HttpRequest> {
        Ok(request)
    }

    /// Observe or rewrite the final response.
    async fn intercept_response(&self, response: HttpResponse) -> Result<HttpResponse> {
        Ok(response)
    }

    /// Observe or replace the final error of a failed request.
    async fn intercept_error(&self, error: HttpClientError) -> HttpClientError {
        error
    }
}

/// Logging interceptor that logs requests, responses, and errors.
pub struct LoggingInterceptor {
    log_headers: bool,
}

impl LoggingInterceptor {
    /// Create a new logging interceptor.
    pub fn new() -> Self {
        Self { log_headers: false }
    }

    /// Enable logging of headers.
    pub fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept_request(&self, request: HttpRequest) -> Result<HttpRequest> {
        tracing::debug!(
            method = %request.method,
            url = %request.url,
            "Sending HTTP request"
        );

        if self.log_headers {
            for (name, value) in &request.headers {
                tracing::trace!(
                    header = %name,
                    value = ?value,
                    "Request header"
                );
            }
        }

        Ok(request)
    }

    async fn intercept_response(&self, response: HttpResponse) -> Result<HttpResponse> {
        tracing::debug!(
            status = %response.status(),
            from_cache = response.from_cache(),
            "Received HTTP response"
        );

        if self.log_headers {
            for (name, value) in response.headers() {
                tracing::trace!(
                    header = %name,
                    value = ?value,
                    "Response header"
                );
            }
        }

        Ok(response)
    }

    async fn intercept_error(&self, error: HttpClientError) -> HttpClientError {
        tracing::debug!(error = %error, "HTTP request failed");
        error
    }
}

/// Authentication interceptor that adds auth headers.
pub struct AuthInterceptor {
    auth_type: AuthType,
}

enum AuthType {
    Bearer(String),
    Basic { username: String, password: String },
    ApiKey { header: String, key: String },
}

impl AuthInterceptor {
    /// Create a bearer token interceptor.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            auth_type: AuthType::Bearer(token.into()),
        }
    }

    /// Create a basic auth interceptor.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            auth_type: AuthType::Basic {
                username: username.into(),
                password: password.into(),
            },
        }
    }

    /// Create an API key interceptor.
    pub fn api_key(header: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            auth_type: AuthType::ApiKey {
                header: header.into(),
                key: key.into(),
            },
        }
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    async fn intercept_request(&self, mut request: HttpRequest) -> Result<HttpRequest> {
        let (name, value) = match &self.auth_type {
            AuthType::Bearer(token) => (
                http::header::AUTHORIZATION,
                format!("Bearer {}", token),
            ),
            AuthType::Basic { username, password } => {
                use base64::Engine;
                let credentials = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                (http::header::AUTHORIZATION, format!("Basic {}", credentials))
            }
            AuthType::ApiKey { header, key } => {
                let name = http::header::HeaderName::try_from(header.as_str())
                    .map_err(|e| HttpClientError::Interceptor(e.to_string()))?;
                (name, key.clone())
            }
        };

        let value = value
            .parse()
            .map_err(|e: http::header::InvalidHeaderValue| {
                HttpClientError::Interceptor(e.to_string())
            })?;
        request.headers.insert(name, value);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[tokio::test]
    async fn test_auth_interceptor_bearer() {
        let interceptor = AuthInterceptor::bearer("tok");
        let request = HttpRequest::new(Method::GET, "https://api.example.com/a");
        let request = interceptor.intercept_request(request).await.unwrap();
        assert_eq!(
            request.headers.get("authorization").unwrap(),
            "Bearer tok"
        );
    }

    #[tokio::test]
    async fn test_auth_interceptor_api_key() {
        let interceptor = AuthInterceptor::api_key("x-api-key", "secret");
        let request = HttpRequest::new(Method::GET, "https://api.example.com/a");
        let request = interceptor.intercept_request(request).await.unwrap();
        assert_eq!(request.headers.get("x-api-key").unwrap(), "secret");
    }

    #[tokio::test]
    async fn test_default_hooks_pass_through() {
        struct Noop;
        #[async_trait]
        impl Interceptor for Noop {}

        let request = HttpRequest::new(Method::GET, "https://api.example.com/a");
        let out = Noop.intercept_request(request).await.unwrap();
        assert_eq!(out.url, "https://api.example.com/a");

        let error = HttpClientError::CircuitOpen;
        assert!(matches!(
            Noop.intercept_error(error).await,
            HttpClientError::CircuitOpen
        ));
    }
}
