use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use time::OffsetDateTime;

use crate::engine::cookies::store::CookieStore;
use crate::engine::cookies::Cookie;
use crate::errors::SyncError;

#[derive(Default)]
pub struct InMemoryCookieStore {
    /// Cookies by name
    cookies: RwLock<HashMap<String, Cookie>>,
}

impl InMemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) cookies.
    pub fn len(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let cookies = self.cookies.read().unwrap_or_else(PoisonError::into_inner);
        cookies.values().filter(|c| !c.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CookieStore for InMemoryCookieStore {
    fn get(&self, name: &str) -> Option<String> {
        let cookies = self.cookies.read().unwrap_or_else(PoisonError::into_inner);
        cookies
            .get(name)
            .filter(|c| !c.is_expired(OffsetDateTime::now_utc()))
            .map(|c| c.value.clone())
    }

    fn set(&self, cookie: Cookie) -> Result<(), SyncError> {
        let mut cookies = self.cookies.write().unwrap_or_else(PoisonError::into_inner);
        if cookie.is_expired(OffsetDateTime::now_utc()) {
            cookies.remove(&cookie.name);
        } else {
            cookies.insert(cookie.name.clone(), cookie);
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), SyncError> {
        self.cookies.write().unwrap_or_else(PoisonError::into_inner).remove(name);
        Ok(())
    }
}
