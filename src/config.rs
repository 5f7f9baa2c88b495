//! Engine configuration.
//!
//! `EngineConfig` tells the sync engine where the client proxy lives, how long
//! the local cookie cache may be trusted, and whether a redirect to the operator
//! may be triggered as soon as one is needed.
//!
//! `EngineConfig` provides sensible defaults via [`EngineConfig::new`] and a fluent
//! [`EngineConfig::builder()`] for customization with validation.
//!
//! # Examples
//!
//! ```rust
//! use onekey_sync::config::EngineConfig;
//! use std::time::Duration;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = EngineConfig::builder()
//!     .proxy_host_name("paf.publisher.example")
//!     .trigger_redirect_if_needed(false)
//!     .refresh_ttl(Duration::from_secs(60 * 60))
//!     .build()?;
//! assert_eq!(cfg.proxy_host_name, "paf.publisher.example");
//! # Ok(()) }
//! ```
//!
//! # Fields (summary)
//! - `proxy_host_name`: host name of the client proxy (required).
//! - `proxy_scheme`: scheme used to reach the proxy (default: `https`).
//! - `trigger_redirect_if_needed`: redirect immediately when needed, or defer (default: `true`).
//! - `data_cache_ttl`: lifetime of the identifiers/preferences cookies (default: 30 days).
//! - `refresh_ttl`: lifetime of the last-refresh cookie (default: 3 hours).
//! - `user_agent`: user agent used for the third-party cookie heuristic.
//! - `request_timeout`: timeout for every proxy/operator request (default: 30 seconds).
//! - `prompt_policy` / `notification_policy`: how calls are buffered before a handler exists.

use crate::engine::events::PendingPolicy;
use std::time::Duration;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

const DEFAULT_DATA_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(3 * 60 * 60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub proxy_host_name: String,
    pub proxy_scheme: String,
    pub trigger_redirect_if_needed: bool,
    pub data_cache_ttl: Duration,
    pub refresh_ttl: Duration,
    pub user_agent: String,
    pub request_timeout: Option<Duration>,
    pub prompt_policy: PendingPolicy,
    pub notification_policy: PendingPolicy,
}

impl EngineConfig {
    /// Default configuration for the given proxy host.
    pub fn new<S: Into<String>>(proxy_host_name: S) -> Self {
        Self {
            proxy_host_name: proxy_host_name.into(),
            proxy_scheme: "https".to_string(),
            trigger_redirect_if_needed: true,
            data_cache_ttl: DEFAULT_DATA_CACHE_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            prompt_policy: PendingPolicy::KeepLatest,
            notification_policy: PendingPolicy::Queue(8),
        }
    }

    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    inner: EngineConfig,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self { inner: EngineConfig::new("") }
    }
}

impl EngineConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut EngineConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn proxy_host_name<S: Into<String>>(self, host: S) -> Self { self.map(|c| c.proxy_host_name = host.into()) }
    pub fn proxy_scheme<S: Into<String>>(self, scheme: S) -> Self { self.map(|c| c.proxy_scheme = scheme.into()) }
    pub fn trigger_redirect_if_needed(self, on: bool) -> Self { self.map(|c| c.trigger_redirect_if_needed = on) }
    pub fn data_cache_ttl(self, ttl: Duration) -> Self { self.map(|c| c.data_cache_ttl = ttl) }
    pub fn refresh_ttl(self, ttl: Duration) -> Self { self.map(|c| c.refresh_ttl = ttl) }
    pub fn user_agent<S: Into<String>>(self, ua: S) -> Self { self.map(|c| c.user_agent = ua.into()) }
    pub fn request_timeout(self, timeout: Option<Duration>) -> Self { self.map(|c| c.request_timeout = timeout) }
    pub fn prompt_policy(self, policy: PendingPolicy) -> Self { self.map(|c| c.prompt_policy = policy) }
    pub fn notification_policy(self, policy: PendingPolicy) -> Self { self.map(|c| c.notification_policy = policy) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut EngineConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("proxy_host_name must not be empty")]
    MissingProxyHost,
    #[error("proxy_host_name must be a bare host name, got {0:?}")]
    InvalidProxyHost(String),
    #[error("proxy_scheme must be http or https, got {0:?}")]
    InvalidScheme(String),
    #[error("refresh_ttl must be non-zero")]
    ZeroRefreshTtl,
    #[error("refresh_ttl ({refresh:?}) > data_cache_ttl ({data:?})")]
    RefreshLongerThanData { refresh: Duration, data: Duration },
    #[error("pending queue capacity must be at least 1")]
    ZeroPendingCapacity,
}

fn validate(c: &EngineConfig) -> Result<(), ConfigError> {
    if c.proxy_host_name.is_empty() {
        return Err(ConfigError::MissingProxyHost);
    }
    if c.proxy_host_name.contains("://") || c.proxy_host_name.contains('/') {
        return Err(ConfigError::InvalidProxyHost(c.proxy_host_name.clone()));
    }
    if c.proxy_scheme != "https" && c.proxy_scheme != "http" {
        return Err(ConfigError::InvalidScheme(c.proxy_scheme.clone()));
    }
    if c.refresh_ttl.is_zero() {
        return Err(ConfigError::ZeroRefreshTtl);
    }
    if c.refresh_ttl > c.data_cache_ttl {
        return Err(ConfigError::RefreshLongerThanData {
            refresh: c.refresh_ttl,
            data: c.data_cache_ttl,
        });
    }
    for policy in [c.prompt_policy, c.notification_policy] {
        if policy == PendingPolicy::Queue(0) {
            return Err(ConfigError::ZeroPendingCapacity);
        }
    }
    Ok(())
}
