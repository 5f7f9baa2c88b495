use crate::config::EngineConfig;
use crate::errors::SyncError;
use crate::net::{HttpClient, HttpRequest, HttpResponse};
use async_trait::async_trait;
use http::header::CONTENT_TYPE;

/// [`HttpClient`] backed by `reqwest`, with a cookie jar shared by every request.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(config: &EngineConfig) -> Result<Self, SyncError> {
        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(config.user_agent.clone());
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self { client: builder.build()? })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SyncError> {
        log::debug!("{} {}", request.method, request.url);

        let mut req = self.client.request(request.method, request.url);
        if let Some(body) = request.body {
            // Plain text avoids the OPTIONS pre-flight a JSON content type would trigger
            req = req.header(CONTENT_TYPE, "text/plain;charset=UTF-8").body(body);
        }
        let res = req.send().await?;

        let final_url = res.url().clone();
        let status = res.status().as_u16();
        let status_text = res.status().canonical_reason().unwrap_or("Unknown").to_string();
        let headers = res.headers().clone();

        // Fetch body. We don't do streaming
        let body = res.bytes().await?.to_vec();

        Ok(HttpResponse {
            url: final_url,
            status,
            status_text,
            headers,
            body,
        })
    }
}
