//! HTTP capability.
//!
//! Every call to the client proxy and to the operator goes through an [`HttpClient`].
//! The engine never talks to `reqwest` directly, so hosts can plug their own transport
//! and tests can script responses.
//!
//! Requests carry credentials (cookies) on both hops. POST bodies are sent as plain text,
//! which keeps browsers from issuing a CORS pre-flight.

mod fetch;
mod response;

use crate::errors::SyncError;
use async_trait::async_trait;
use http::Method;
use std::sync::Arc;
use url::Url;

pub use fetch::ReqwestClient;
pub use response::HttpResponse;

/// A request to the proxy or the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    /// Plain text body (usually JSON).
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self { method: Method::GET, url, body: None }
    }

    pub fn post<B: Into<String>>(url: Url, body: B) -> Self {
        Self { method: Method::POST, url, body: Some(body.into()) }
    }

    pub fn delete(url: Url) -> Self {
        Self { method: Method::DELETE, url, body: None }
    }
}

/// Sends requests with credentials included.
///
/// Implementations return any response they receive, whatever its status code, and only
/// fail on transport errors (connection, timeout).
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SyncError>;
}

pub type HttpClientHandle = Arc<dyn HttpClient + Send + Sync>;
