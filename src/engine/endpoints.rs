//! Client proxy endpoints and query string parameters.

use crate::config::EngineConfig;
use crate::errors::SyncError;
use url::Url;

/// Endpoints answering JSON (or the URL of the operator endpoint to call next).
pub mod json {
    pub const READ: &str = "/paf-proxy/v1/ids-prefs";
    pub const WRITE: &str = "/paf-proxy/v1/ids-prefs";
    pub const DELETE: &str = "/paf-proxy/v1/ids-prefs";
    pub const VERIFY_3PC: &str = "/paf-proxy/v1/3pc";
    pub const NEW_ID: &str = "/paf-proxy/v1/new-id";
    pub const SIGN_WRITE: &str = "/paf-proxy/v1/sign/ids-prefs";
    pub const SIGN_PREFS: &str = "/paf-proxy/v1/sign/prefs";
    pub const CREATE_SEED: &str = "/paf-proxy/v1/seed";
    pub const VERIFY_READ: &str = "/paf-proxy/v1/verify/read";
}

/// Endpoints returning the operator URL to navigate to.
pub mod redirect {
    pub const READ: &str = "/paf-proxy/v1/redirect/get-ids-prefs";
    pub const WRITE: &str = "/paf-proxy/v1/redirect/post-ids-prefs";
    pub const DELETE: &str = "/paf-proxy/v1/redirect/delete-ids-prefs";
}

/// Query string parameters.
pub mod params {
    /// Operator response attached to the return URL.
    pub const PAF: &str = "paf";
    pub const RETURN_URL: &str = "returnUrl";
    /// Unsigned write payload sent to the redirect write endpoint.
    pub const MESSAGE: &str = "message";
    /// Local only: the prompt option in force before the redirect.
    pub const SHOW_PROMPT: &str = "paf_show_prompt";
}

/// Builds absolute proxy URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyUrls {
    base: Url,
}

impl ProxyUrls {
    pub fn new(config: &EngineConfig) -> Result<Self, SyncError> {
        let base = Url::parse(&format!("{}://{}", config.proxy_scheme, config.proxy_host_name))?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
        Ok(self.base.join(path)?)
    }

    /// Endpoint URL with the given query parameters appended.
    pub fn endpoint_with(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, SyncError> {
        let mut url = self.endpoint(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().copied());
        }
        Ok(url)
    }
}

/// First value of query parameter `name`.
pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.into_owned())
}

/// Copy of `url` without the given query parameters. Other parameters keep their order.
pub fn strip_query_params(url: &Url, names: &[&str]) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !names.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut cleaned = url.clone();
    if kept.is_empty() {
        cleaned.set_query(None);
    } else {
        cleaned.query_pairs_mut().clear().extend_pairs(kept);
    }
    cleaned
}

/// `url` with `name` set to `value`, replacing any previous value.
pub fn with_query_param(url: &Url, name: &str, value: &str) -> Url {
    let mut updated = strip_query_params(url, &[name]);
    updated.query_pairs_mut().append_pair(name, value);
    updated
}
