// src/engine/cookies.rs
//! Cookies: the [`CookieStore`] capability, its backends, and the [`CookieCache`]
//! holding the three durable signals of the sync protocol.

mod cache;
mod cookies;
mod store;

pub use cache::{classify, CookieCache, CookieCacheEntry, IDENTIFIERS, LAST_REFRESH, PREFERENCES};
pub use cookies::Cookie;
pub use cookies::CookieStoreHandle;

pub use store::CookieStore;
pub use store::InMemoryCookieStore;
pub use store::JsonCookieStore;
