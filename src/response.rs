//! HTTP response wrapper and body decoding.

use crate::error::{HttpClientError, Result};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

/// Body decoding selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Pick a decoding based on the response `Content-Type`.
    #[default]
    Auto,
    /// Decode the body as JSON.
    Json,
    /// Decode the body as UTF-8 text.
    Text,
    /// Return the raw bytes.
    Bytes,
}

/// A response body decoded according to a [`ResponseType`].
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedBody {
    /// Parsed JSON value.
    Json(serde_json::Value),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Bytes),
}

/// A `Link` header entry relevant for resource hinting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHint {
    /// Target URL of the hint.
    pub url: String,
    /// Hint relation.
    pub rel: LinkRel,
}

/// Relation kinds recognized by the hint scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRel {
    /// `rel=preload`.
    Preload,
    /// `rel=prefetch`.
    Prefetch,
}

/// HTTP response descriptor.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body: Bytes,
    etag: Option<String>,
    from_cache: bool,
    response_type: ResponseType,
}

impl HttpResponse {
    /// Build a response descriptor; the ETag is lifted from the headers.
    pub fn new(status: StatusCode, headers: HeaderMap, url: Url, body: Bytes) -> Self {
        let etag = headers
            .get(http::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        Self {
            status,
            headers,
            url,
            body,
            etag,
            from_cache: false,
            response_type: ResponseType::Auto,
        }
    }

    /// Mark this descriptor as served from the cache.
    pub(crate) fn mark_cached(mut self) -> Self {
        self.from_cache = true;
        self
    }

    /// Record the selector the request asked for; [`data`](Self::data)
    /// decodes with it.
    pub(crate) fn with_response_type(mut self, kind: ResponseType) -> Self {
        self.response_type = kind;
        self
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Canonical reason phrase for the status, e.g. `"Not Found"`.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    /// Check if the response was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Check if the response was a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    /// Check if the response was a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Get the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a specific header value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Get the final response URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get the response body as bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response and return the body as bytes.
    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    /// The entity tag the server attached, if any.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Whether this descriptor was served from the client cache.
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// Get the response body as text.
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec()).map_err(|e| HttpClientError::Network {
            url: self.url.to_string(),
            message: format!("invalid UTF-8 in response body: {e}"),
        })
    }

    /// Parse the response body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| HttpClientError::Json(e.to_string()))
    }

    /// Decode the body with the selector the request was issued with.
    pub fn data(&self) -> Result<DecodedBody> {
        self.decode(self.response_type)
    }

    /// Decode the body according to the given selector.
    ///
    /// `Auto` inspects `Content-Type`: `application/json*` decodes as JSON,
    /// `text/*` as text, and anything else attempts JSON before falling
    /// back to text.
    pub fn decode(&self, kind: ResponseType) -> Result<DecodedBody> {
        match kind {
            ResponseType::Json => Ok(DecodedBody::Json(self.json()?)),
            ResponseType::Text => Ok(DecodedBody::Text(self.text()?)),
            ResponseType::Bytes => Ok(DecodedBody::Bytes(self.body.clone())),
            ResponseType::Auto => {
                let content_type = self.content_type().unwrap_or("");
                if content_type.starts_with("application/json") {
                    Ok(DecodedBody::Json(self.json()?))
                } else if content_type.starts_with("text/") {
                    Ok(DecodedBody::Text(self.text()?))
                } else if let Ok(value) = self.json::<serde_json::Value>() {
                    Ok(DecodedBody::Json(value))
                } else {
                    Ok(DecodedBody::Text(self.text()?))
                }
            }
        }
    }

    /// Get the declared content length if available.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    /// Get the content type if available.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Scan `Link` headers for `rel=preload|prefetch` entries.
    pub fn link_hints(&self) -> Vec<LinkHint> {
        let mut hints = Vec::new();
        for value in self.headers.get_all(http::header::LINK) {
            let Ok(value) = value.to_str() else { continue };
            for entry in value.split(',') {
                if let Some(hint) = parse_link_entry(entry) {
                    hints.push(hint);
                }
            }
        }
        hints
    }
}

/// Parse one `<url>; rel=...` segment of a `Link` header.
fn parse_link_entry(entry: &str) -> Option<LinkHint> {
    let entry = entry.trim();
    let url_end = entry.find('>')?;
    let url = entry.strip_prefix('<')?[..url_end - 1].trim();
    if url.is_empty() {
        return None;
    }

    for param in entry[url_end + 1..].split(';') {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("rel") {
            continue;
        }
        let value = value.trim().trim_matches('"');
        let rel = value.split_ascii_whitespace().find_map(|rel| match rel {
            "preload" => Some(LinkRel::Preload),
            "prefetch" => Some(LinkRel::Prefetch),
            _ => None,
        })?;
        return Some(LinkHint {
            url: url.to_string(),
            rel,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content_type: Option<&str>, body: &str) -> HttpResponse {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(http::header::CONTENT_TYPE, ct.parse().unwrap());
        }
        HttpResponse::new(
            StatusCode::OK,
            headers,
            Url::parse("https://api.example.com/a").unwrap(),
            Bytes::copy_from_slice(body.as_bytes()),
        )
    }

    #[test]
    fn test_auto_decodes_declared_json() {
        let resp = response(Some("application/json; charset=utf-8"), r#"{"x":1}"#);
        assert_eq!(
            resp.decode(ResponseType::Auto).unwrap(),
            DecodedBody::Json(serde_json::json!({"x": 1}))
        );
    }

    #[test]
    fn test_auto_decodes_declared_text() {
        let resp = response(Some("text/plain"), "42");
        assert_eq!(
            resp.decode(ResponseType::Auto).unwrap(),
            DecodedBody::Text("42".to_string())
        );
    }

    #[test]
    fn test_auto_falls_back_json_then_text() {
        let resp = response(None, r#"{"ok":true}"#);
        assert_eq!(
            resp.decode(ResponseType::Auto).unwrap(),
            DecodedBody::Json(serde_json::json!({"ok": true}))
        );

        let resp = response(Some("application/octet-stream"), "not json");
        assert_eq!(
            resp.decode(ResponseType::Auto).unwrap(),
            DecodedBody::Text("not json".to_string())
        );
    }

    #[test]
    fn test_data_uses_request_selector() {
        let resp = response(Some("application/json"), r#"{"x":1}"#)
            .with_response_type(ResponseType::Text);
        assert_eq!(
            resp.data().unwrap(),
            DecodedBody::Text(r#"{"x":1}"#.to_string())
        );
    }

    #[test]
    fn test_explicit_selectors() {
        let resp = response(Some("text/plain"), r#"{"x":1}"#);
        assert!(matches!(
            resp.decode(ResponseType::Json).unwrap(),
            DecodedBody::Json(_)
        ));
        assert!(matches!(
            resp.decode(ResponseType::Bytes).unwrap(),
            DecodedBody::Bytes(_)
        ));
    }

    #[test]
    fn test_status_text() {
        let resp = response(None, "");
        assert_eq!(resp.status_text(), "OK");
        assert!(resp.ok());
    }

    #[test]
    fn test_etag_lifted_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::ETAG, "\"v1\"".parse().unwrap());
        let resp = HttpResponse::new(
            StatusCode::OK,
            headers,
            Url::parse("https://api.example.com/a").unwrap(),
            Bytes::new(),
        );
        assert_eq!(resp.etag(), Some("\"v1\""));
    }

    #[test]
    fn test_link_hints() {
        let mut headers = HeaderMap::new();
        headers.append(
            http::header::LINK,
            "</style.css>; rel=preload; as=style, </next>; rel=\"prefetch\""
                .parse()
                .unwrap(),
        );
        headers.append(http::header::LINK, "</other>; rel=author".parse().unwrap());
        let resp = HttpResponse::new(
            StatusCode::OK,
            headers,
            Url::parse("https://api.example.com/a").unwrap(),
            Bytes::new(),
        );

        let hints = resp.link_hints();
        assert_eq!(
            hints,
            vec![
                LinkHint {
                    url: "/style.css".to_string(),
                    rel: LinkRel::Preload,
                },
                LinkHint {
                    url: "/next".to_string(),
                    rel: LinkRel::Prefetch,
                },
            ]
        );
    }
}
