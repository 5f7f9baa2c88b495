//! Typed calls to the client proxy and the operator.
//!
//! Most operator calls take two hops: the proxy signs the request and answers with the
//! operator URL as plain text, then that URL is called directly so the operator sees its
//! own (third-party) cookies.

use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::engine::endpoints::{json, ProxyUrls};
use crate::errors::SyncError;
use crate::model::{
    GetIdsPrefsResponse, GetNewIdResponse, Identifier, IdsAndPreferences, PostIdsPrefsRequest, PostSeedRequest,
    PostSignPreferencesRequest, Preferences, Seed, ThirdPartyCookieCheck,
};
use crate::net::{HttpClientHandle, HttpRequest, HttpResponse};

#[derive(Clone)]
pub struct ProxyClient {
    http: HttpClientHandle,
    urls: ProxyUrls,
}

impl ProxyClient {
    pub fn new(http: HttpClientHandle, urls: ProxyUrls) -> Self {
        Self { http, urls }
    }

    pub fn urls(&self) -> &ProxyUrls {
        &self.urls
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SyncError> {
        self.http.send(request).await?.error_for_status()
    }

    async fn send_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, SyncError> {
        self.send(request).await?.json()
    }

    fn body<T: Serialize + ?Sized>(input: &T) -> Result<String, SyncError> {
        Ok(serde_json::to_string(input)?)
    }

    /// Sends `request` to the proxy and parses the operator URL it answers with.
    async fn operator_url(&self, request: HttpRequest) -> Result<Url, SyncError> {
        let text = self.send(request).await?.text()?;
        Url::parse(text.trim())
            .map_err(|e| SyncError::InvalidResponse(format!("proxy returned an invalid operator URL {:?}: {}", text, e)))
    }

    /// Reads the ids and preferences known to the operator.
    pub async fn read(&self) -> Result<GetIdsPrefsResponse, SyncError> {
        let operator = self.operator_url(HttpRequest::get(self.urls.endpoint(json::READ)?)).await?;
        self.send_json(HttpRequest::get(operator)).await
    }

    /// Probes whether the operator cookie set by a previous call came back.
    pub async fn verify_3pc(&self) -> Result<bool, SyncError> {
        let operator = self
            .operator_url(HttpRequest::get(self.urls.endpoint(json::VERIFY_3PC)?))
            .await?;
        let response = self.http.send(HttpRequest::get(operator)).await?;
        if !response.is_success() {
            log::debug!("3PC probe answered {}", response.status);
            return Ok(false);
        }
        // Error bodies have no "3pc" field and read as unsupported
        Ok(response.json::<ThirdPartyCookieCheck>().map(|c| c.supported).unwrap_or(false))
    }

    /// Asks the operator for a new (unpersisted) identifier.
    pub async fn new_id(&self) -> Result<Identifier, SyncError> {
        let operator = self.operator_url(HttpRequest::get(self.urls.endpoint(json::NEW_ID)?)).await?;
        let response: GetNewIdResponse = self.send_json(HttpRequest::get(operator)).await?;
        response
            .body
            .identifiers
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::InvalidResponse("operator returned no identifier".to_string()))
    }

    pub async fn sign_write(&self, input: &IdsAndPreferences) -> Result<PostIdsPrefsRequest, SyncError> {
        let url = self.urls.endpoint(json::SIGN_WRITE)?;
        self.send_json(HttpRequest::post(url, Self::body(input)?)).await
    }

    /// Sends a signed write to the operator.
    pub async fn write(&self, signed: &PostIdsPrefsRequest) -> Result<GetIdsPrefsResponse, SyncError> {
        let operator = self
            .operator_url(HttpRequest::post(self.urls.endpoint(json::WRITE)?, ""))
            .await?;
        self.send_json(HttpRequest::post(operator, Self::body(signed)?)).await
    }

    /// Deletes the operator's ids and preferences.
    pub async fn delete(&self) -> Result<(), SyncError> {
        let operator = self
            .operator_url(HttpRequest::delete(self.urls.endpoint(json::DELETE)?))
            .await?;
        self.send(HttpRequest::delete(operator)).await?;
        Ok(())
    }

    pub async fn sign_preferences(&self, input: &PostSignPreferencesRequest) -> Result<Preferences, SyncError> {
        let url = self.urls.endpoint(json::SIGN_PREFS)?;
        self.send_json(HttpRequest::post(url, Self::body(input)?)).await
    }

    pub async fn create_seed(&self, input: &PostSeedRequest) -> Result<Seed, SyncError> {
        let url = self.urls.endpoint(json::CREATE_SEED)?;
        self.send_json(HttpRequest::post(url, Self::body(input)?)).await
    }

    /// Verifies an operator payload received on the return URL.
    ///
    /// Returns `None` when the proxy rejects it, either with a JSON `null` or a 4xx answer.
    /// Server errors stay [`SyncError::HttpStatus`].
    pub async fn verify_read(&self, payload: &str) -> Result<Option<GetIdsPrefsResponse>, SyncError> {
        let url = self.urls.endpoint(json::VERIFY_READ)?;
        let response = self.http.send(HttpRequest::post(url, payload)).await?;
        if (400..500).contains(&response.status) {
            log::warn!("Operator payload rejected with {}", response.status);
            return Ok(None);
        }
        response.error_for_status()?.json()
    }

    /// Asks a redirect endpoint for the operator URL to navigate to.
    pub async fn redirect_target(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Url, SyncError> {
        let url = self.urls.endpoint_with(endpoint, query)?;
        self.operator_url(HttpRequest::get(url)).await
    }
}
