//! Pluggable wire transport.
//!
//! The pipeline talks to the network through [`Transport`] only, so tests
//! and embedders can substitute their own wire layer. [`ReqwestTransport`]
//! is the production implementation.

use crate::config::HttpClientConfig;
use crate::error::{HttpClientError, Result};
use crate::request::{MultipartForm, PartValue, Priority, RequestBody};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::time::Duration;
use url::Url;

/// Options for a single dispatch.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// HTTP method.
    pub method: Method,
    /// Fully merged headers.
    pub headers: HeaderMap,
    /// Encoded body.
    pub body: RequestBody,
    /// Per-attempt time budget. The pipeline enforces it as well; passing
    /// it down lets the transport abort the connection promptly.
    pub timeout: Duration,
    /// Scheduling hint; transports without prioritization ignore it.
    pub priority: Option<Priority>,
    /// Responses whose declared or actual size exceeds this fail with a
    /// `Network` error before any decoding happens.
    pub max_response_size: usize,
}

/// A complete wire response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Final URL after any redirects.
    pub url: Url,
    /// Response body.
    pub body: Bytes,
}

/// Wire-level request primitive consumed by the pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one request and read the complete response.
    async fn send(&self, url: Url, options: TransportOptions) -> Result<TransportResponse>;
}

/// Production transport backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport from the client configuration.
    pub fn new(config: &HttpClientConfig) -> Self {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent);

        if config.gzip {
            builder = builder.gzip(true);
        }
        if config.brotli {
            builder = builder.brotli(true);
        }
        if config.follow_redirects {
            builder = builder.redirect(reqwest::redirect::Policy::limited(config.max_redirects));
        } else {
            builder = builder.redirect(reqwest::redirect::Policy::none());
        }

        let inner = builder.build().expect("Failed to build HTTP transport");
        Self { inner }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, url: Url, options: TransportOptions) -> Result<TransportResponse> {
        let url_text = url.to_string();
        let mut request = self
            .inner
            .request(options.method, url)
            .timeout(options.timeout)
            .headers(options.headers);

        request = match options.body {
            RequestBody::Empty => request,
            RequestBody::Bytes(bytes) => request.body(bytes),
            RequestBody::Multipart(form) => request.multipart(to_reqwest_form(form)?),
        };

        let response = request
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, &url_text, options.timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let final_url = response.url().clone();

        check_declared_length(&headers, options.max_response_size, &url_text)?;

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest_error(e, &url_text, options.timeout))?;
        if body.len() > options.max_response_size {
            return Err(response_too_large(
                body.len() as u64,
                options.max_response_size,
                &url_text,
            ));
        }

        Ok(TransportResponse {
            status,
            headers,
            url: final_url,
            body,
        })
    }
}

/// Reject a response whose declared `Content-Length` already exceeds the
/// limit, before the body is read.
fn check_declared_length(headers: &HeaderMap, max: usize, url: &str) -> Result<()> {
    let declared = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    match declared {
        Some(length) if length > max as u64 => Err(response_too_large(length, max, url)),
        _ => Ok(()),
    }
}

fn response_too_large(actual: u64, max: usize, url: &str) -> HttpClientError {
    HttpClientError::Network {
        url: url.to_string(),
        message: format!("response body of {actual} bytes exceeds limit of {max} bytes"),
    }
}

fn classify_reqwest_error(error: reqwest::Error, url: &str, timeout: Duration) -> HttpClientError {
    if error.is_timeout() {
        HttpClientError::Timeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        HttpClientError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

fn to_reqwest_form(form: MultipartForm) -> Result<reqwest::multipart::Form> {
    let mut out = reqwest::multipart::Form::new();
    for part in form.parts() {
        match &part.value {
            PartValue::Text(text) => {
                out = out.text(part.name.clone(), text.clone());
            }
            PartValue::Bytes {
                data,
                file_name,
                mime,
            } => {
                let mut p = reqwest::multipart::Part::bytes(data.to_vec());
                if let Some(file_name) = file_name {
                    p = p.file_name(file_name.clone());
                }
                if let Some(mime) = mime {
                    p = p
                        .mime_str(mime)
                        .map_err(|e| HttpClientError::RequestBuild(e.to_string()))?;
                }
                out = out.part(part.name.clone(), p);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_length_guard() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_LENGTH, "2048".parse().unwrap());

        assert!(check_declared_length(&headers, 4096, "https://a").is_ok());

        let err = check_declared_length(&headers, 1024, "https://a").unwrap_err();
        assert!(matches!(err, HttpClientError::Network { .. }));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_missing_or_bad_length_passes() {
        let headers = HeaderMap::new();
        assert!(check_declared_length(&headers, 1, "https://a").is_ok());

        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_LENGTH, "garbage".parse().unwrap());
        assert!(check_declared_length(&headers, 1, "https://a").is_ok());
    }

    #[test]
    fn test_multipart_conversion() {
        let form = MultipartForm::new()
            .text("field", "value")
            .file("upload", Bytes::from_static(b"data"), "a.bin", "application/octet-stream");
        assert!(to_reqwest_form(form).is_ok());

        let bad = MultipartForm::new().file("u", Bytes::new(), "a", "not a mime");
        assert!(to_reqwest_form(bad).is_err());
    }
}
