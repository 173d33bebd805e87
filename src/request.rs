//! Request descriptor, bodies, and the request builder.

use crate::client::HttpClient;
use crate::error::{HttpClientError, Result};
use crate::response::{HttpResponse, ResponseType};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use url::Url;

/// Scheduling hint forwarded to transports that support prioritization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Latency-sensitive request.
    High,
    /// Background request.
    Low,
}

/// External abort handle for a request.
///
/// Cloneable; cancelling any clone aborts every request the token was
/// attached to.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Create a new, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort all requests carrying this token.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether the token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token fires. Resolves immediately for a token that
    /// is already cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Request body.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// Pre-encoded bytes (JSON, form-urlencoded, text, raw).
    Bytes(Bytes),
    /// Multipart form; the transport sets the boundary.
    Multipart(MultipartForm),
}

impl RequestBody {
    /// Payload size used for the request-size limit.
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Bytes(bytes) => bytes.len(),
            Self::Multipart(form) => form
                .parts()
                .iter()
                .map(|part| match &part.value {
                    PartValue::Text(text) => text.len(),
                    PartValue::Bytes { data, .. } => data.len(),
                })
                .sum(),
        }
    }

    /// True when no payload will be sent.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A multipart form body.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    parts: Vec<MultipartPart>,
}

/// One field of a multipart form.
#[derive(Debug, Clone)]
pub struct MultipartPart {
    /// Field name.
    pub name: String,
    /// Field payload.
    pub value: PartValue,
}

/// Multipart field payload.
#[derive(Debug, Clone)]
pub enum PartValue {
    /// Plain text field.
    Text(String),
    /// Binary field, optionally with a file name and MIME type.
    Bytes {
        /// Raw content.
        data: Bytes,
        /// File name hint.
        file_name: Option<String>,
        /// MIME type hint.
        mime: Option<String>,
    },
}

impl MultipartForm {
    /// Create an empty form.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text field.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(MultipartPart {
            name: name.into(),
            value: PartValue::Text(value.into()),
        });
        self
    }

    /// Append a binary field.
    pub fn bytes(mut self, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.parts.push(MultipartPart {
            name: name.into(),
            value: PartValue::Bytes {
                data: data.into(),
                file_name: None,
                mime: None,
            },
        });
        self
    }

    /// Append a file field with name and MIME hints.
    pub fn file(
        mut self,
        name: impl Into<String>,
        data: impl Into<Bytes>,
        file_name: impl Into<String>,
        mime: impl Into<String>,
    ) -> Self {
        self.parts.push(MultipartPart {
            name: name.into(),
            value: PartValue::Bytes {
                data: data.into(),
                file_name: Some(file_name.into()),
                mime: Some(mime.into()),
            },
        });
        self
    }

    /// Promote a mapping into a form, omitting fields whose value is
    /// `None`.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut form = Self::new();
        for (name, value) in pairs {
            if let Some(value) = value {
                form = form.text(name, value);
            }
        }
        form
    }

    /// The accumulated fields.
    pub fn parts(&self) -> &[MultipartPart] {
        &self.parts
    }
}

/// Request descriptor consumed by the pipeline and seen by request
/// interceptors.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL, or a path resolved against the client's base URL.
    pub url: String,
    /// Query parameters in insertion order.
    pub query: Vec<(String, String)>,
    /// Request headers; merged over the client defaults at dispatch.
    pub headers: HeaderMap,
    /// Request body.
    pub body: RequestBody,
    /// Per-request timeout override.
    pub timeout: Option<Duration>,
    /// Cache participation: `None` keeps the default (GET requests cache).
    pub cache: Option<bool>,
    /// Body decoding selector.
    pub response_type: ResponseType,
    /// Scheduling hint.
    pub priority: Option<Priority>,
    /// External abort handle.
    pub cancel: Option<CancelToken>,
}

impl HttpRequest {
    /// Create a descriptor with defaults for everything but method and URL.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: None,
            cache: None,
            response_type: ResponseType::Auto,
            priority: None,
            cancel: None,
        }
    }
}

/// Resolve a request URL against an optional base.
///
/// Protocol-relative URLs are rejected: an ambiguous scheme could leak
/// credentials over cleartext.
pub(crate) fn resolve_url(base: Option<&str>, url: &str) -> Result<Url> {
    if url.starts_with("//") {
        return Err(HttpClientError::InvalidUrl(format!(
            "protocol-relative URL not allowed: {url}"
        )));
    }

    // Only a scheme anchored at the start makes a URL absolute; "://"
    // appearing later (say, inside a redirect_uri query value) does not.
    match leading_scheme(url) {
        Some(scheme)
            if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") =>
        {
            return Url::parse(url)
                .map_err(|e| HttpClientError::InvalidUrl(format!("{url}: {e}")));
        }
        Some(_) => {
            return Err(HttpClientError::InvalidUrl(format!(
                "unsupported scheme: {url}"
            )));
        }
        None => {}
    }

    let Some(base) = base else {
        return Err(HttpClientError::InvalidUrl(format!(
            "relative URL without a base URL: {url}"
        )));
    };
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        url.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| HttpClientError::InvalidUrl(format!("{joined}: {e}")))
}

/// The scheme a URL starts with, if any (RFC 3986: alpha followed by
/// alphanumerics, `+`, `-`, or `.`, then `://`).
fn leading_scheme(url: &str) -> Option<&str> {
    let (scheme, _) = url.split_once("://")?;
    let mut chars = scheme.chars();
    let starts_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    (starts_alpha && valid_tail).then_some(scheme)
}

/// Append query parameters in insertion order.
pub(crate) fn apply_query(url: &mut Url, query: &[(String, String)]) {
    if query.is_empty() {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    for (key, value) in query {
        pairs.append_pair(key, value);
    }
}

/// HTTP request builder.
pub struct RequestBuilder<'a> {
    client: &'a HttpClient,
    request: HttpRequest,
    error: Option<HttpClientError>,
}

impl<'a> RequestBuilder<'a> {
    /// Create a new request builder.
    pub(crate) fn new(client: &'a HttpClient, method: Method, url: String) -> Self {
        Self {
            client,
            request: HttpRequest::new(method, url),
            error: None,
        }
    }

    /// Add a header to the request.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_ref()),
            HeaderValue::try_from(value.as_ref()),
        ) {
            self.request.headers.insert(name, value);
        }
        self
    }

    /// Add multiple headers to the request.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.request.headers.extend(headers);
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.request.query.push((key.into(), value.to_string()));
        self
    }

    /// Add a query parameter only when a value is present.
    pub fn query_opt(mut self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
        if let Some(value) = value {
            self.request.query.push((key.into(), value.to_string()));
        }
        self
    }

    /// Add multiple query parameters.
    pub fn queries<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        for (k, v) in params {
            self.request.query.push((k.into(), v.to_string()));
        }
        self
    }

    /// Set the request body as raw bytes.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = RequestBody::Bytes(body.into());
        self
    }

    /// Set the request body as text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.request.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.request.body = RequestBody::Bytes(Bytes::from(text.into().into_bytes()));
        self
    }

    /// Set the request body as JSON.
    pub fn json<T: Serialize + ?Sized>(mut self, json: &T) -> Self {
        match serde_json::to_vec(json) {
            Ok(bytes) => {
                self.request.headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                self.request.body = RequestBody::Bytes(Bytes::from(bytes));
            }
            Err(e) => {
                self.error = Some(HttpClientError::Json(e.to_string()));
            }
        }
        self
    }

    /// Set the request body as `application/x-www-form-urlencoded`.
    pub fn form<T: Serialize + ?Sized>(mut self, form: &T) -> Self {
        match serde_urlencoded::to_string(form) {
            Ok(encoded) => {
                self.request.headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                );
                self.request.body = RequestBody::Bytes(Bytes::from(encoded.into_bytes()));
            }
            Err(e) => {
                self.error = Some(HttpClientError::RequestBuild(e.to_string()));
            }
        }
        self
    }

    /// Set the request body as a multipart form.
    pub fn multipart(mut self, form: MultipartForm) -> Self {
        self.request.body = RequestBody::Multipart(form);
        self
    }

    /// Set a custom timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    /// Opt this request in or out of the response cache.
    pub fn cache(mut self, enabled: bool) -> Self {
        self.request.cache = Some(enabled);
        self
    }

    /// Select how the response body is decoded.
    pub fn response_type(mut self, kind: ResponseType) -> Self {
        self.request.response_type = kind;
        self
    }

    /// Attach a scheduling hint.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.request.priority = Some(priority);
        self
    }

    /// Attach an external abort handle.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.request.cancel = Some(token);
        self
    }

    /// Set bearer authentication.
    pub fn bearer_auth(self, token: impl Into<String>) -> Self {
        self.header("Authorization", format!("Bearer {}", token.into()))
    }

    /// Set basic authentication.
    pub fn basic_auth(
        self,
        username: impl Into<String>,
        password: Option<impl Into<String>>,
    ) -> Self {
        use base64::Engine;
        let credentials = match password {
            Some(p) => format!("{}:{}", username.into(), p.into()),
            None => format!("{}:", username.into()),
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        self.header("Authorization", format!("Basic {}", encoded))
    }

    /// Send the request through the client pipeline.
    pub async fn send(self) -> Result<HttpResponse> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.client.execute(self.request).await
    }
}
