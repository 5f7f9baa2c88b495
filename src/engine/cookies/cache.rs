//! The cookie cache: identifiers, preferences and last-refresh.
//!
//! The three values are independent cookies. The data cookies live for
//! `data_cache_ttl`; the last-refresh cookie lives for `refresh_ttl` and only acts as a
//! validity clock: once it is gone the engine re-validates with the operator.
//!
//! Data cookies hold either JSON (`[...]` identifiers, `{...}` preferences) or one of the
//! raw status sentinels. Readers must tolerate mismatched pairs, since two cookies are
//! never written atomically.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::engine::cookies::{Cookie, CookieStoreHandle};
use crate::engine::status::{is_sentinel, Status, NOT_PARTICIPATING, REDIRECT_NEEDED};
use crate::errors::SyncError;
use crate::model::{Identifier, IdsAndOptionalPreferences, IdsAndPreferences, Preferences};

/// Cookie holding the identifiers (JSON array or sentinel).
pub const IDENTIFIERS: &str = "paf_identifiers";
/// Cookie holding the preferences (JSON object or sentinel).
pub const PREFERENCES: &str = "paf_preferences";
/// Cookie holding the ISO timestamp of the last refresh.
pub const LAST_REFRESH: &str = "paf_last_refresh";

/// Resolves the status implied by the two raw data cookies.
///
/// `REDIRECT_NEEDED` wins over everything, then `NOT_PARTICIPATING`. A pair with a
/// missing side (typically identifiers without preferences) is `Unknown`.
pub fn classify(ids_raw: Option<&str>, prefs_raw: Option<&str>) -> Status {
    if ids_raw == Some(REDIRECT_NEEDED) || prefs_raw == Some(REDIRECT_NEEDED) {
        return Status::RedirectNeeded;
    }
    if ids_raw == Some(NOT_PARTICIPATING) || prefs_raw == Some(NOT_PARTICIPATING) {
        return Status::NotParticipating;
    }
    match (ids_raw, prefs_raw) {
        (Some(ids), Some(prefs)) if !ids.is_empty() && !prefs.is_empty() => Status::Participating,
        _ => Status::Unknown,
    }
}

/// Raw values of the three cookies at the time of reading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieCacheEntry {
    pub identifiers: Option<String>,
    pub preferences: Option<String>,
    pub last_refresh: Option<String>,
}

impl CookieCacheEntry {
    pub fn status(&self) -> Status {
        classify(self.identifiers.as_deref(), self.preferences.as_deref())
    }

    /// True when the validity clock is still running.
    pub fn is_fresh(&self) -> bool {
        self.last_refresh.as_deref().is_some_and(|v| !v.is_empty())
    }

    /// Parsed data, with sentinels and malformed values treated as absent.
    pub fn data(&self) -> IdsAndOptionalPreferences {
        IdsAndOptionalPreferences {
            identifiers: parse_value::<Vec<Identifier>>(IDENTIFIERS, self.identifiers.as_deref()).unwrap_or_default(),
            preferences: parse_value::<Preferences>(PREFERENCES, self.preferences.as_deref()),
        }
    }

    /// Consent currently recorded locally, if any.
    pub fn consent(&self) -> Option<bool> {
        self.data().consent()
    }

    /// The cached data, if it is fresh and complete.
    pub fn complete_data(&self) -> Option<IdsAndPreferences> {
        if !self.is_fresh() {
            return None;
        }
        self.data().into_complete()
    }
}

fn parse_value<T: DeserializeOwned>(name: &str, raw: Option<&str>) -> Option<T> {
    let raw = raw.filter(|v| !v.is_empty() && !is_sentinel(v))?;
    match serde_json::from_str(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("Ignoring malformed cookie {}: {}", name, e);
            None
        }
    }
}

/// Reads and writes the protocol cookies through a [`CookieStoreHandle`].
#[derive(Clone)]
pub struct CookieCache {
    store: CookieStoreHandle,
    data_ttl: Duration,
    refresh_ttl: Duration,
}

impl CookieCache {
    pub fn new(store: CookieStoreHandle, data_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            store,
            data_ttl,
            refresh_ttl,
        }
    }

    pub fn read(&self) -> CookieCacheEntry {
        CookieCacheEntry {
            identifiers: self.store.get(IDENTIFIERS),
            preferences: self.store.get(PREFERENCES),
            last_refresh: self.store.get(LAST_REFRESH),
        }
    }

    /// Stores `value` as JSON in cookie `name`, or the `NOT_PARTICIPATING` sentinel for
    /// `None`. Always restarts the last-refresh clock. Returns the raw value written.
    pub fn save_value<T: Serialize + ?Sized>(&self, name: &str, value: Option<&T>) -> Result<String, SyncError> {
        let raw = match value {
            Some(v) => serde_json::to_string(v)?,
            None => NOT_PARTICIPATING.to_string(),
        };
        self.save_raw(name, &raw)?;
        Ok(raw)
    }

    /// Stores a raw value (JSON or sentinel) and restarts the last-refresh clock.
    pub fn save_raw(&self, name: &str, raw: &str) -> Result<(), SyncError> {
        log::debug!("Save cookie {}: {}", name, raw);

        let now = OffsetDateTime::now_utc();
        self.store.set(Cookie::new(name, raw).expires_at(now + self.data_ttl))?;

        let stamp = now
            .format(&Rfc3339)
            .map_err(|e| SyncError::Cookie(format!("cannot format timestamp: {}", e)))?;
        self.store.set(Cookie::new(LAST_REFRESH, stamp).expires_at(now + self.refresh_ttl))
    }

    /// Writes both data cookies. `None` means "not participating" for that side.
    pub fn save(
        &self,
        identifiers: Option<&[Identifier]>,
        preferences: Option<&Preferences>,
    ) -> Result<(String, String), SyncError> {
        let ids = self.save_value(IDENTIFIERS, identifiers)?;
        let prefs = self.save_value(PREFERENCES, preferences)?;
        Ok((ids, prefs))
    }

    /// Records an explicit opt-out on both data cookies.
    pub fn save_not_participating(&self) -> Result<(), SyncError> {
        self.save_raw(IDENTIFIERS, NOT_PARTICIPATING)?;
        self.save_raw(PREFERENCES, NOT_PARTICIPATING)
    }

    /// Records that a redirect was deferred, so later calls do not re-decide locally.
    pub fn save_redirect_needed(&self) -> Result<(), SyncError> {
        self.save_raw(IDENTIFIERS, REDIRECT_NEEDED)?;
        self.save_raw(PREFERENCES, REDIRECT_NEEDED)
    }

    /// Removes both data cookies. The last-refresh clock is left as is.
    pub fn clear(&self) -> Result<(), SyncError> {
        self.store.remove(IDENTIFIERS)?;
        self.store.remove(PREFERENCES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cookies::{CookieStore, InMemoryCookieStore};
    use crate::model::{PreferencesData, Source};
    use std::sync::Arc;

    fn cache() -> (Arc<InMemoryCookieStore>, CookieCache) {
        let store = Arc::new(InMemoryCookieStore::new());
        let cache = CookieCache::new(
            store.clone(),
            Duration::from_secs(30 * 24 * 3600),
            Duration::from_secs(3 * 3600),
        );
        (store, cache)
    }

    fn id(value: &str) -> Identifier {
        serde_json::from_value(serde_json::json!({ "value": value })).unwrap()
    }

    fn prefs(opt_in: bool) -> Preferences {
        Preferences {
            version: "0.1".into(),
            data: PreferencesData { use_browsing_for_personalization: opt_in },
            source: Some(Source { domain: "op.test".into(), timestamp: 1, signature: "sig".into() }),
        }
    }

    #[test]
    fn redirect_sentinel_wins_for_every_pair() {
        let others = [None, Some(""), Some("[]"), Some("{}"), Some(NOT_PARTICIPATING), Some(REDIRECT_NEEDED)];
        for other in others {
            assert_eq!(classify(Some(REDIRECT_NEEDED), other), Status::RedirectNeeded);
            assert_eq!(classify(other, Some(REDIRECT_NEEDED)), Status::RedirectNeeded);
        }
    }

    #[test]
    fn not_participating_beats_data() {
        assert_eq!(classify(Some(NOT_PARTICIPATING), Some("{}")), Status::NotParticipating);
        assert_eq!(classify(Some("[]"), Some(NOT_PARTICIPATING)), Status::NotParticipating);
    }

    #[test]
    fn missing_side_is_unknown() {
        assert_eq!(classify(Some(r#"[{"value":"a"}]"#), None), Status::Unknown);
        assert_eq!(classify(None, None), Status::Unknown);
        assert_eq!(classify(Some(r#"[{"value":"a"}]"#), Some("{}")), Status::Participating);
    }

    #[test]
    fn save_then_read_reproduces_status() {
        let (_, cache) = cache();
        let ids = vec![id("abc")];

        cache.save(Some(ids.as_slice()), Some(&prefs(true))).unwrap();
        let entry = cache.read();
        assert_eq!(entry.status(), Status::Participating);
        assert!(entry.is_fresh());
        assert_eq!(entry.data().identifiers, ids);
        assert_eq!(entry.consent(), Some(true));
        assert!(entry.complete_data().is_some());

        let (ids_raw, prefs_raw) = cache.save(Some(ids.as_slice()), None).unwrap();
        assert!(ids_raw.starts_with('['));
        assert_eq!(prefs_raw, NOT_PARTICIPATING);
        assert_eq!(cache.read().status(), Status::NotParticipating);
    }

    #[test]
    fn save_value_restarts_last_refresh() {
        let (store, cache) = cache();
        assert!(!cache.read().is_fresh());

        cache.save_value::<Preferences>(PREFERENCES, None).unwrap();
        let stamp = store.get(LAST_REFRESH).unwrap();
        assert!(OffsetDateTime::parse(&stamp, &Rfc3339).is_ok());
    }

    #[test]
    fn redirect_needed_is_stored_raw() {
        let (store, cache) = cache();
        cache.save_redirect_needed().unwrap();
        assert_eq!(store.get(IDENTIFIERS).as_deref(), Some(REDIRECT_NEEDED));
        assert_eq!(cache.read().status(), Status::RedirectNeeded);
        assert!(cache.read().data().identifiers.is_empty());
    }

    #[test]
    fn clear_removes_data_but_not_clock() {
        let (store, cache) = cache();
        cache.save(Some(vec![id("a")].as_slice()), Some(&prefs(false))).unwrap();
        cache.clear().unwrap();

        let entry = cache.read();
        assert!(entry.identifiers.is_none());
        assert!(entry.preferences.is_none());
        assert!(store.get(LAST_REFRESH).is_some());
        assert_eq!(entry.status(), Status::Unknown);
    }

    #[test]
    fn malformed_json_is_treated_as_absent() {
        let (store, cache) = cache();
        store.set(Cookie::new(IDENTIFIERS, "[not json")).unwrap();
        store.set(Cookie::new(PREFERENCES, "{}")).unwrap();
        store.set(Cookie::new(LAST_REFRESH, "2025-01-01T00:00:00Z")).unwrap();

        let entry = cache.read();
        assert!(entry.data().identifiers.is_empty());
        assert!(entry.complete_data().is_none());
    }
}
