//! Cookie core types.
//!
//! This module defines the **type-erased handle** used throughout the engine
//! and the serializable [`Cookie`] data structure.
//!
//! # Concurrency model
//! - [`CookieStoreHandle`] is `Arc<dyn CookieStore + Send + Sync>`.
//!   - Stores manage their **own internal synchronization**. The trait methods take `&self`,
//!     so one handle can be shared between the orchestrators and the host.
//!
//! The [`Cookie`] struct is used for persistence/inspection and can be (de)serialized
//! via `serde` to JSON.
//!
//! ```rust
//! use onekey_sync::cookies::Cookie;
//! use time::macros::datetime;
//!
//! let c = Cookie::new("paf_last_refresh", "2025-01-01T00:00:00Z")
//!     .expires_at(datetime!(2025-01-01 03:00 UTC));
//! assert!(c.is_expired(datetime!(2025-01-02 00:00 UTC)));
//! ```

use crate::engine::cookies::store::CookieStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;

/// A handle to a cookie store trait.
///
/// Store implementations must be **`Send + Sync` and internally synchronized**,
/// since callers hold only `&self` when invoking trait methods.
pub type CookieStoreHandle = Arc<dyn CookieStore + Send + Sync>;

/// A first-party cookie as stored by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name (case-sensitive).
    pub name: String,

    /// Raw cookie value (not URL-decoded).
    pub value: String,

    /// Expiration timestamp, if any. Session cookies have `None`.
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub expires: Option<OffsetDateTime>,
}

impl Cookie {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: None,
        }
    }

    pub fn expires_at(mut self, at: OffsetDateTime) -> Self {
        self.expires = Some(at);
        self
    }

    /// A cookie expires at its exact expiration instant.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        matches!(self.expires, Some(at) if at <= now)
    }
}
