//! Scripted capabilities for engine tests.

use async_trait::async_trait;
use http::Method;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::config::EngineConfig;
use crate::engine::cookies::InMemoryCookieStore;
use crate::engine::engine::SyncEngine;
use crate::engine::navigator::InMemoryNavigator;
use crate::engine::placement::StaticPlacementResolver;
use crate::errors::SyncError;
use crate::net::{HttpClient, HttpRequest, HttpResponse};

pub const CHROME_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
pub const SAFARI_UA: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15";

pub const PROXY: &str = "https://paf.site.test";
pub const OPERATOR: &str = "https://operator.test";
pub const PAGE: &str = "https://site.test/article?id=1";

/// HTTP client answering from a script keyed by `METHOD url-without-query`.
///
/// Responses for a key are consumed in order; the last one keeps answering.
#[derive(Default)]
pub struct ScriptedHttpClient {
    script: Mutex<HashMap<String, VecDeque<(u16, String)>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

fn key(method: &Method, url: &Url) -> String {
    let mut bare = url.clone();
    bare.set_query(None);
    format!("{} {}", method, bare)
}

impl ScriptedHttpClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, method: Method, url: &str, status: u16, body: impl Into<String>) -> &Self {
        let url = Url::parse(url).unwrap();
        self.script
            .lock()
            .unwrap()
            .entry(key(&method, &url))
            .or_default()
            .push_back((status, body.into()));
        self
    }

    pub fn on_json(&self, method: Method, url: &str, body: Value) -> &Self {
        self.on(method, url, 200, body.to_string())
    }

    /// Scripts a proxy endpoint that answers with an operator URL, and the operator answer.
    pub fn on_two_hop(&self, method: Method, proxy_path: &str, operator_path: &str, body: Value) -> &Self {
        let operator = format!("{}{}", OPERATOR, operator_path);
        self.on(method.clone(), &format!("{}{}", PROXY, proxy_path), 200, format!("{}?signed=1", operator));
        self.on_json(method, &operator, body)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn called(&self, method: Method, url: &str) -> bool {
        let wanted = key(&method, &Url::parse(url).unwrap());
        self.requests().iter().any(|r| key(&r.method, &r.url) == wanted)
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SyncError> {
        self.requests.lock().unwrap().push(request.clone());

        let k = key(&request.method, &request.url);
        let mut script = self.script.lock().unwrap();
        let queue = script
            .get_mut(&k)
            .ok_or_else(|| SyncError::Network(format!("unscripted request {}", k)))?;
        let (status, body) = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        };
        Ok(HttpResponse::new(request.url, status, body))
    }
}

pub struct Harness {
    pub engine: SyncEngine,
    pub http: Arc<ScriptedHttpClient>,
    pub cookies: Arc<InMemoryCookieStore>,
    pub navigator: Arc<InMemoryNavigator>,
}

pub fn harness(user_agent: &str, trigger_redirect_if_needed: bool) -> Harness {
    harness_at(user_agent, trigger_redirect_if_needed, PAGE)
}

pub fn harness_at(user_agent: &str, trigger_redirect_if_needed: bool, page: &str) -> Harness {
    let config = EngineConfig::builder()
        .proxy_host_name("paf.site.test")
        .user_agent(user_agent)
        .trigger_redirect_if_needed(trigger_redirect_if_needed)
        .build()
        .unwrap();

    let http = ScriptedHttpClient::new();
    let cookies = Arc::new(InMemoryCookieStore::new());
    let navigator = Arc::new(InMemoryNavigator::new(Url::parse(page).unwrap()));
    let placements = StaticPlacementResolver::new()
        .with_placement("div-top")
        .with_ad_unit("/123/top", "div-top");

    let engine = SyncEngine::builder(config)
        .cookie_store(cookies.clone())
        .http_client(http.clone())
        .navigator(navigator.clone())
        .placement_resolver(Arc::new(placements))
        .build()
        .unwrap();

    Harness { engine, http, cookies, navigator }
}

pub fn source() -> Value {
    json!({ "domain": "operator.test", "timestamp": 1700000000000u64, "signature": "sig" })
}

pub fn identifier(value: &str, persisted: bool) -> Value {
    json!({ "version": "0.1", "type": "paf_browser_id", "value": value, "source": source(), "persisted": persisted })
}

pub fn preferences(opt_in: bool) -> Value {
    json!({ "version": "0.1", "data": { "use_browsing_for_personalization": opt_in }, "source": source() })
}

/// Signed operator message around `body`.
pub fn signed(body: Value) -> Value {
    json!({ "sender": "operator.test", "receiver": "site.test", "timestamp": 1700000000000u64, "signature": "sig", "body": body })
}
