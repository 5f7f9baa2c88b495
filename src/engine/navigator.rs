//! Page navigation capability.

use std::sync::{Arc, PoisonError, RwLock};
use url::Url;

/// Access to the address bar of the current page.
pub trait Navigator: Send + Sync {
    fn current_url(&self) -> Url;

    /// Replaces the visible URL without loading a page or adding a history entry.
    fn replace_url(&self, url: &Url);

    /// Navigates the whole page to `url`. Nothing in the current page runs after it.
    fn redirect(&self, url: &Url);
}

pub type NavigatorHandle = Arc<dyn Navigator + Send + Sync>;

/// Navigator for headless hosts and tests. Records every navigation.
#[derive(Debug)]
pub struct InMemoryNavigator {
    current: RwLock<Url>,
    redirects: RwLock<Vec<Url>>,
}

impl InMemoryNavigator {
    pub fn new(url: Url) -> Self {
        Self {
            current: RwLock::new(url),
            redirects: RwLock::new(Vec::new()),
        }
    }

    /// Simulates loading `url` in the page, e.g. the return from the operator.
    pub fn load(&self, url: Url) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = url;
    }

    pub fn redirects(&self) -> Vec<Url> {
        self.redirects.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last_redirect(&self) -> Option<Url> {
        self.redirects.read().unwrap_or_else(PoisonError::into_inner).last().cloned()
    }
}

impl Navigator for InMemoryNavigator {
    fn current_url(&self) -> Url {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn replace_url(&self, url: &Url) {
        self.load(url.clone());
    }

    fn redirect(&self, url: &Url) {
        log::info!("Navigating to {}", url);
        self.redirects.write().unwrap_or_else(PoisonError::into_inner).push(url.clone());
    }
}
