// src/engine/engine.rs
//! The sync engine.
//!
//! [`SyncEngine`] owns the cookie cache, the event arbiters, the startup queue and the seed
//! registry of one page. The orchestrators are implemented in `refresh`, `write` and `seed`.
//!
//! Every orchestrator returns an [`Outcome`]. [`Outcome::Redirected`] means the page was
//! sent to the operator: the startup queue is stopped and the host must not continue the
//! flow in this context.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use url::Url;

use crate::config::EngineConfig;
use crate::engine::cookies::{CookieCache, CookieStoreHandle, InMemoryCookieStore};
use crate::engine::endpoints::ProxyUrls;
use crate::engine::events::{EventArbiter, Fired, Notification, SyncEvent};
use crate::engine::navigator::{InMemoryNavigator, NavigatorHandle};
use crate::engine::placement::{PlacementResolverHandle, StaticPlacementResolver};
use crate::engine::proxy::ProxyClient;
use crate::engine::queue::CommandQueue;
use crate::engine::seed::SeedRegistry;
use crate::engine::status::Status;
use crate::errors::SyncError;
use crate::model::{Identifier, IdsAndOptionalPreferences};
use crate::net::{HttpClientHandle, ReqwestClient};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Result of an operation that may have navigated away from the page.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum Outcome<T> {
    Completed(T),
    /// The page is navigating to `url`; nothing else runs in this context.
    Redirected { url: Url },
}

impl<T> Outcome<T> {
    pub fn is_redirected(&self) -> bool {
        matches!(self, Outcome::Redirected { .. })
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            Outcome::Redirected { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Completed(v) => Outcome::Completed(f(v)),
            Outcome::Redirected { url } => Outcome::Redirected { url },
        }
    }
}

/// Status and data resolved by a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshResult {
    pub status: Status,
    pub data: Option<IdsAndOptionalPreferences>,
}

impl RefreshResult {
    pub fn new(status: Status, data: Option<IdsAndOptionalPreferences>) -> Self {
        Self { status, data }
    }
}

/// In-memory state of the current page.
#[derive(Debug, Default)]
pub(crate) struct EngineState {
    /// Only known after a refresh reached the operator (or a redirect came back)
    pub third_party_cookies_supported: Option<bool>,
    /// Identifiers minted by the operator but not written anywhere yet
    pub unpersisted_ids: Vec<Identifier>,
    pub status: Option<Status>,
}

pub struct SyncEngine {
    pub(crate) config: EngineConfig,
    pub(crate) cookies: CookieCache,
    pub(crate) proxy: ProxyClient,
    pub(crate) navigator: NavigatorHandle,
    pub(crate) placements: PlacementResolverHandle,
    pub(crate) prompt: EventArbiter<(), Option<bool>>,
    pub(crate) notifications: EventArbiter<Notification, ()>,
    pub(crate) queue: CommandQueue,
    pub(crate) registry: Mutex<SeedRegistry>,
    state: Mutex<EngineState>,
    events: broadcast::Sender<SyncEvent>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("proxy", self.proxy.urls().base())
            .field("state", &*self.state())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn builder(config: EngineConfig) -> SyncEngineBuilder {
        SyncEngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Queue of commands executed once [`start`](Self::start) has run.
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Last status resolved by an orchestrator.
    pub fn status(&self) -> Option<Status> {
        self.state().status
    }

    pub fn third_party_cookies_supported(&self) -> Option<bool> {
        self.state().third_party_cookies_supported
    }

    /// Identifiers minted by the operator that are not persisted yet.
    pub fn unpersisted_ids(&self) -> Vec<Identifier> {
        self.state().unpersisted_ids.clone()
    }

    /// Registers the prompt handler. Resolves once buffered prompts were answered.
    ///
    /// The handler returns the user's opt-in choice, or `None` if the prompt was dismissed.
    pub async fn set_prompt_handler<F, Fut>(&self, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<bool>> + Send + 'static,
    {
        self.prompt.set_handler(move |()| handler()).await
    }

    pub async fn set_notification_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.notifications.set_handler(handler).await
    }

    /// Handles the return from the operator, if any, then runs the buffered commands.
    ///
    /// Buffered commands run even when the resume failed; the error is returned afterwards.
    pub async fn start(&self) -> Result<Option<Outcome<RefreshResult>>, SyncError> {
        let resumed = self.handle_after_boomerang_redirect().await;
        if let Err(e) = &resumed {
            log::error!("Failed to process operator response: {}", e);
        }

        let executed = self.queue.set_up_immediate_processing();
        log::debug!("Startup queue drained ({} commands)", executed);

        resumed
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_third_party_cookies_supported(&self, supported: bool) {
        self.state().third_party_cookies_supported = Some(supported);
    }

    pub(crate) fn set_unpersisted_ids(&self, ids: Vec<Identifier>) {
        self.state().unpersisted_ids = ids;
    }

    pub(crate) fn set_status(&self, status: Status) {
        let previous = self.state().status.replace(status);
        if previous != Some(status) {
            self.emit(SyncEvent::StatusChanged { status });
        }
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // No subscriber is fine
        let _ = self.events.send(event);
    }

    /// Fires a notification when `new_consent` is known and differs from `previous`.
    pub(crate) async fn notify_if_changed(&self, previous: Option<bool>, new_consent: Option<bool>) {
        let Some(consent) = new_consent else {
            return;
        };
        if previous == Some(consent) {
            log::debug!("No preferences changes ({:?}), don't show notification", previous);
            return;
        }

        log::debug!("Preferences changes detected ({:?} => {}), show notification", previous, consent);
        let notification = Notification::for_consent(consent);
        self.emit(SyncEvent::NotificationFired { notification });

        match self.notifications.fire(notification) {
            Fired::Immediate(fut) => fut.await,
            // Delivered when the host registers its handler
            Fired::Deferred(_) => log::debug!("Notification {} buffered", notification),
        }
    }

    /// Asks the redirect endpoint for the operator URL and navigates there.
    pub(crate) async fn redirect_through(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Url, SyncError> {
        let url = self.proxy.redirect_target(endpoint, query).await?;

        log::info!("Redirecting to: {}", url);
        self.navigator.redirect(&url);
        self.queue.stop();
        self.emit(SyncEvent::Redirecting { url: url.clone() });

        Ok(url)
    }
}

/// Builder for [`SyncEngine`]. Capabilities that are not set get a default implementation.
pub struct SyncEngineBuilder {
    config: EngineConfig,
    cookie_store: Option<CookieStoreHandle>,
    http_client: Option<HttpClientHandle>,
    navigator: Option<NavigatorHandle>,
    placement_resolver: Option<PlacementResolverHandle>,
}

impl SyncEngineBuilder {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cookie_store: None,
            http_client: None,
            navigator: None,
            placement_resolver: None,
        }
    }

    pub fn cookie_store(mut self, store: CookieStoreHandle) -> Self {
        self.cookie_store = Some(store);
        self
    }

    pub fn http_client(mut self, client: HttpClientHandle) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn navigator(mut self, navigator: NavigatorHandle) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn placement_resolver(mut self, resolver: PlacementResolverHandle) -> Self {
        self.placement_resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Result<SyncEngine, SyncError> {
        let config = self.config;
        let urls = ProxyUrls::new(&config)?;

        let http = match self.http_client {
            Some(client) => client,
            None => std::sync::Arc::new(ReqwestClient::new(&config)?),
        };
        let store = self
            .cookie_store
            .unwrap_or_else(|| std::sync::Arc::new(InMemoryCookieStore::new()));
        let navigator = self
            .navigator
            .unwrap_or_else(|| std::sync::Arc::new(InMemoryNavigator::new(urls.base().clone())));
        let placements = self
            .placement_resolver
            .unwrap_or_else(|| std::sync::Arc::new(StaticPlacementResolver::new()));

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(SyncEngine {
            cookies: CookieCache::new(store, config.data_cache_ttl, config.refresh_ttl),
            proxy: ProxyClient::new(http, urls),
            navigator,
            placements,
            prompt: EventArbiter::new("prompt", config.prompt_policy),
            notifications: EventArbiter::new("notification", config.notification_policy),
            queue: CommandQueue::new(),
            registry: Mutex::new(SeedRegistry::default()),
            state: Mutex::new(EngineState::default()),
            events,
            config,
        })
    }
}
