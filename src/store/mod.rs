//! Purpose: Abstract the backing document store behind one injectable trait.
//! Exports: `DocumentStore`, `Versioned`, `StoreSettings`, `open_store`, backends.
//! Role: The gateway only talks to `Arc<dyn DocumentStore>`; backends are chosen by URL scheme.
//! Invariants: Store calls are blocking; async callers run them on the blocking pool.
//! Invariants: Unreachable stores report `ErrorKind::Unavailable`, never panic.
//! Invariants: Opening a store never performs I/O; connectivity is probed separately.
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::core::error::{Error, ErrorKind};

pub mod http;
pub mod memory;

pub use http::HttpDocumentStore;
pub use memory::MemoryStore;

pub type StoreResult<T> = Result<T, Error>;

/// A stored document with the store's optimistic concurrency token.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned {
    pub document: Value,
    pub cas: Option<String>,
}

pub trait DocumentStore: Send + Sync {
    fn get(&self, id: &str) -> StoreResult<Versioned>;

    /// Fails with `Conflict` when `id` already exists.
    fn insert(&self, id: &str, document: &Value) -> StoreResult<()>;

    /// Replaces an existing document. With `cas`, fails with `Conflict` if the
    /// document changed since that token was read.
    fn replace(&self, id: &str, document: &Value, cas: Option<&str>) -> StoreResult<()>;

    /// Removes a document. With `cas`, fails with `Conflict` if it changed since that token was read.
    fn remove(&self, id: &str, cas: Option<&str>) -> StoreResult<()>;

    /// Every document of the card kind (current or legacy shape), keyed by id,
    /// ordered by `createdAt` then id before `limit` applies.
    fn list_cards(&self, limit: Option<usize>) -> StoreResult<Vec<(String, Value)>>;

    fn ping(&self) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}

#[derive(Clone, Debug)]
pub struct StoreSettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub bucket: Option<String>,
    pub scope: String,
    pub collection: String,
    pub timeout: Duration,
}

impl StoreSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            bucket: None,
            scope: "_default".to_string(),
            collection: "_default".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

pub fn open_store(settings: &StoreSettings) -> Result<Arc<dyn DocumentStore>, Error> {
    let url = Url::parse(&settings.url).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid store url")
            .with_hint("Use http(s)://host[:port] or memory://.")
            .with_source(err)
    })?;
    match url.scheme() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "http" | "https" => Ok(Arc::new(HttpDocumentStore::new(url, settings)?)),
        other => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("unsupported store url scheme: {other}"))
            .with_hint("Use http(s)://host[:port] or memory://.")),
    }
}

#[cfg(test)]
mod tests {
    use super::{StoreSettings, open_store};
    use crate::core::error::ErrorKind;

    #[test]
    fn memory_scheme_opens_memory_store() {
        let store = open_store(&StoreSettings::new("memory://")).expect("store");
        assert_eq!(store.backend_name(), "memory");
    }

    #[test]
    fn http_store_requires_bucket() {
        let err = open_store(&StoreSettings::new("http://127.0.0.1:8091"))
            .err()
            .expect("usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn http_store_opens_without_io() {
        let mut settings = StoreSettings::new("https://cb.example.com");
        settings.bucket = Some("ClashRoyale".to_string());
        let store = open_store(&settings).expect("store");
        assert_eq!(store.backend_name(), "http");
    }

    #[test]
    fn rejects_unknown_schemes() {
        for url in ["couchbases://cb.example.com", "not a url"] {
            let err = open_store(&StoreSettings::new(url)).err().expect("usage error");
            assert_eq!(err.kind(), ErrorKind::Usage, "url: {url}");
        }
    }
}
