//! Buffered HTTP response.
//!
//! Contains the final URL, status code and reason, headers and the raw body bytes.
//! `headers` is an `http::HeaderMap`, which is case-insensitive for header names.
use crate::errors::SyncError;
use http::HeaderMap;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Final URL of the response (after redirects, if any).
    pub url: url::Url,

    /// Numeric HTTP status code (e.g., `200`, `404`).
    pub status: u16,

    /// Human-readable reason phrase. May be `"Unknown"` for non-standard codes.
    pub status_text: String,

    pub headers: HeaderMap,

    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A response with the canonical reason phrase for `status` and no headers.
    pub fn new<B: Into<Vec<u8>>>(url: url::Url, status: u16, body: B) -> Self {
        let status_text = http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown")
            .to_string();

        Self {
            url,
            status,
            status_text,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx response into [`SyncError::HttpStatus`].
    pub fn error_for_status(self) -> Result<Self, SyncError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SyncError::HttpStatus {
                url: self.url.to_string(),
                status: self.status,
            })
        }
    }

    pub fn text(&self) -> Result<String, SyncError> {
        String::from_utf8(self.body.clone())
            .map_err(|e| SyncError::InvalidResponse(format!("{}: body is not UTF-8: {}", self.url, e)))
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SyncError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| SyncError::InvalidResponse(format!("{}: {}", self.url, e)))
    }
}
