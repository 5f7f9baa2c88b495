//! Cookie store infrastructure.
//!
//! A **cookie store** is the host capability that holds the first-party cookies of the
//! page. In a browser it is `document.cookie`; in a native host it can be anything that
//! keeps name/value pairs with an expiration.
//!
//! This module exports two reference implementations:
//! - [`InMemoryCookieStore`]: process-lifetime store (tests, ephemeral hosts).
//! - [`JsonCookieStore`]: file-backed JSON store (good for simple native setups).
//!
//! ## Design notes
//! - Stores never return expired cookies.
//! - Implementations should be `Send + Sync` and safe for concurrent access.
//! - There is no transaction across several cookies: each `set` stands alone.
mod in_memory;
mod json;

use crate::engine::cookies::Cookie;
use crate::errors::SyncError;

/// Process-lifetime cookie store.
pub use in_memory::InMemoryCookieStore;
/// File-backed cookie store.
pub use json::JsonCookieStore;

/// Name/value cookie storage with expiration.
pub trait CookieStore: Send + Sync {
    /// Returns the value of the cookie `name`, unless it is absent or expired.
    fn get(&self, name: &str) -> Option<String>;

    /// Stores `cookie`, replacing any cookie with the same name.
    ///
    /// Storing a cookie whose expiration is in the past removes it.
    fn set(&self, cookie: Cookie) -> Result<(), SyncError>;

    /// Removes the cookie `name`. Idempotent.
    fn remove(&self, name: &str) -> Result<(), SyncError>;
}
