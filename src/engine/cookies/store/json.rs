//! JSON-backed cookie store.
//!
//! `JsonCookieStore` persists the cookies of one host in a single JSON file on disk.
//! Every mutation rewrites the whole file, so the file always mirrors the in-memory state.
//!
//! ### Design
//! - One file (`CookieStoreFile { cookies: HashMap<String, Cookie> }`).
//! - In-memory cache: `cookies: RwLock<HashMap<String, Cookie>>`, loaded once in [`JsonCookieStore::open`].
//! - Expired cookies are dropped when the file is loaded and never returned.
//!
//! ### I/O characteristics & caveats
//! - Writes are not atomic. A crash mid-write can leave a truncated file, which is
//!   then loaded as an empty store.
//!
//! ### Example
//! ```ignore
//! let store = JsonCookieStore::open("cookies.json".into())?;
//! let engine = SyncEngine::builder(config).cookie_store(store).build()?;
//! ```
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::engine::cookies::store::CookieStore;
use crate::engine::cookies::Cookie;
use crate::errors::SyncError;

/// On-disk representation of the store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CookieStoreFile {
    cookies: HashMap<String, Cookie>,
}

/// A JSON-based cookie store that persists cookies across sessions.
pub struct JsonCookieStore {
    /// Path to the JSON file where cookies are stored.
    path: PathBuf,

    /// Live cookies by name
    cookies: RwLock<HashMap<String, Cookie>>,
}

impl JsonCookieStore {
    /// Opens (or creates) a JSON cookie store at `path`.
    ///
    /// A missing or unreadable file yields an empty store; the file is (re)written
    /// on the first mutation.
    pub fn open(path: PathBuf) -> Result<Arc<Self>, SyncError> {
        let file = Self::load_file(&path);
        let now = OffsetDateTime::now_utc();
        let cookies = file
            .cookies
            .into_iter()
            .filter(|(_, c)| !c.is_expired(now))
            .collect();

        let store = Arc::new(Self {
            path,
            cookies: RwLock::new(cookies),
        });

        if !store.path.exists() {
            store.save_file(&store.cookies.read().unwrap_or_else(PoisonError::into_inner))?;
        }

        Ok(store)
    }

    /// Loads and deserializes the full cookie store file.
    ///
    /// Returns an empty structure if the file is missing or malformed.
    fn load_file(path: &PathBuf) -> CookieStoreFile {
        match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("Cookie store {} is malformed, starting empty: {}", path.display(), e);
                CookieStoreFile::default()
            }),
            Err(_) => CookieStoreFile::default(),
        }
    }

    /// Serializes and writes the full cookie store file (pretty-printed).
    fn save_file(&self, cookies: &HashMap<String, Cookie>) -> Result<(), SyncError> {
        let file = CookieStoreFile { cookies: cookies.clone() };
        let contents = serde_json::to_string_pretty(&file)?;
        fs::write(&self.path, contents)
            .map_err(|e| SyncError::Cookie(format!("cannot write {}: {}", self.path.display(), e)))
    }
}

impl CookieStore for JsonCookieStore {
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
        self.save_file(&cookies)
    }

    fn remove(&self, name: &str) -> Result<(), SyncError> {
        let mut cookies = self.cookies.write().unwrap_or_else(PoisonError::into_inner);
        if cookies.remove(name).is_some() {
            self.save_file(&cookies)?;
        }
        Ok(())
    }
}
