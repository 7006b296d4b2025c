//! In-process document store.
//!
//! Backs `memory://` store URLs and serves as the test double for the gateway.
//! State lives in a `HashMap` behind a `RwLock` and is lost when the process
//! exits. Every write bumps a per-document CAS counter so optimistic replaces
//! behave like the remote store's.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use super::{DocumentStore, StoreResult, Versioned};
use crate::core::card::{CREATED_AT, parse_timestamp};
use crate::core::error::{Error, ErrorKind};
use crate::core::shape::is_card_document;

#[derive(Debug)]
struct Entry {
    document: Value,
    cas: u64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Entry>>,
    next_cas: AtomicU64,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing (or regaining) the connection to the store.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.read().map(|documents| documents.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::Unavailable).with_message("store is offline"));
        }
        Ok(())
    }

    fn bump_cas(&self) -> u64 {
        self.next_cas.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<String, Entry>>> {
        self.ensure_online()?;
        self.documents
            .read()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("store lock poisoned"))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<String, Entry>>> {
        self.ensure_online()?;
        self.documents
            .write()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("store lock poisoned"))
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, id: &str) -> StoreResult<Versioned> {
        let documents = self.read()?;
        let entry = documents.get(id).ok_or_else(|| not_found(id))?;
        Ok(Versioned {
            document: entry.document.clone(),
            cas: Some(entry.cas.to_string()),
        })
    }

    fn insert(&self, id: &str, document: &Value) -> StoreResult<()> {
        let mut documents = self.write()?;
        if documents.contains_key(id) {
            return Err(Error::new(ErrorKind::Conflict)
                .with_message("document already exists")
                .with_id(id));
        }
        let cas = self.bump_cas();
        documents.insert(
            id.to_string(),
            Entry {
                document: document.clone(),
                cas,
            },
        );
        Ok(())
    }

    fn replace(&self, id: &str, document: &Value, cas: Option<&str>) -> StoreResult<()> {
        let mut documents = self.write()?;
        let entry = documents.get_mut(id).ok_or_else(|| not_found(id))?;
        check_cas(id, entry, cas)?;
        entry.document = document.clone();
        entry.cas = self.bump_cas();
        Ok(())
    }

    fn remove(&self, id: &str, cas: Option<&str>) -> StoreResult<()> {
        let mut documents = self.write()?;
        let entry = documents.get(id).ok_or_else(|| not_found(id))?;
        check_cas(id, entry, cas)?;
        documents.remove(id);
        Ok(())
    }

    fn list_cards(&self, limit: Option<usize>) -> StoreResult<Vec<(String, Value)>> {
        let documents = self.read()?;
        let mut cards: Vec<_> = documents
            .iter()
            .filter(|(_, entry)| is_card_document(&entry.document))
            .map(|(id, entry)| (id.clone(), entry.document.clone()))
            .collect();
        cards.sort_by_cached_key(|(id, document)| {
            let created = document
                .get(CREATED_AT)
                .and_then(Value::as_str)
                .and_then(parse_timestamp);
            (created, id.clone())
        });
        if let Some(limit) = limit {
            cards.truncate(limit);
        }
        Ok(cards)
    }

    fn ping(&self) -> StoreResult<()> {
        self.ensure_online()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

fn check_cas(id: &str, entry: &Entry, cas: Option<&str>) -> StoreResult<()> {
    match cas {
        Some(expected) if expected != entry.cas.to_string() => Err(Error::new(ErrorKind::Conflict)
            .with_message("document changed since it was read")
            .with_id(id)),
        _ => Ok(()),
    }
}

fn not_found(id: &str) -> Error {
    Error::new(ErrorKind::NotFound)
        .with_message("document not found")
        .with_id(id)
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::core::error::ErrorKind;
    use crate::store::DocumentStore;
    use serde_json::json;

    #[test]
    fn insert_get_remove_cycle() {
        let store = MemoryStore::new();
        let document = json!({"docType": "card", "name": "Giant", "elixirCost": 5});
        store.insert("card::1", &document).expect("insert");

        let fetched = store.get("card::1").expect("get");
        assert_eq!(fetched.document, document);
        assert!(fetched.cas.is_some());

        store.remove("card::1", fetched.cas.as_deref()).expect("remove");
        let err = store.get("card::1").expect_err("gone");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = store.remove("card::1", None).expect_err("gone");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let store = MemoryStore::new();
        store.insert("card::1", &json!({})).expect("insert");
        let err = store.insert("card::1", &json!({})).expect_err("dup");
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn stale_cas_is_rejected() {
        let store = MemoryStore::new();
        store.insert("card::1", &json!({"v": 1})).expect("insert");
        let first = store.get("card::1").expect("get");

        store
            .replace("card::1", &json!({"v": 2}), first.cas.as_deref())
            .expect("fresh replace");
        let err = store
            .replace("card::1", &json!({"v": 3}), first.cas.as_deref())
            .expect_err("stale replace");
        assert_eq!(err.kind(), ErrorKind::Conflict);

        store
            .replace("card::1", &json!({"v": 4}), None)
            .expect("unconditional replace");
        assert_eq!(store.get("card::1").expect("get").document, json!({"v": 4}));
    }

    #[test]
    fn remove_with_stale_cas_keeps_the_document() {
        let store = MemoryStore::new();
        store.insert("card::1", &json!({"v": 1})).expect("insert");
        let first = store.get("card::1").expect("get");
        store
            .replace("card::1", &json!({"v": 2}), None)
            .expect("replace");

        let err = store
            .remove("card::1", first.cas.as_deref())
            .expect_err("stale remove");
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn list_orders_by_creation_time_before_limiting() {
        let store = MemoryStore::new();
        store
            .insert(
                "card::a",
                &json!({"docType": "card", "name": "Late", "createdAt": "2026-01-02T00:00:00Z"}),
            )
            .expect("insert");
        store
            .insert(
                "card::b",
                &json!({"docType": "card", "name": "Early", "createdAt": "2026-01-01T00:00:00Z"}),
            )
            .expect("insert");

        let ids: Vec<_> = store
            .list_cards(Some(1))
            .expect("list")
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["card::b".to_string()]);
    }

    #[test]
    fn replace_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .replace("card::missing", &json!({}), None)
            .expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn list_only_returns_card_documents() {
        let store = MemoryStore::new();
        store
            .insert("card::a", &json!({"docType": "card", "name": "A"}))
            .expect("insert");
        store
            .insert("card::b", &json!({"type": "card", "data": {"name": "B"}}))
            .expect("insert");
        store
            .insert("deck::1", &json!({"docType": "deck"}))
            .expect("insert");

        let ids: Vec<_> = store
            .list_cards(None)
            .expect("list")
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["card::a".to_string(), "card::b".to_string()]);
        assert_eq!(store.list_cards(Some(1)).expect("list").len(), 1);
    }

    #[test]
    fn offline_store_is_unavailable() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert_eq!(
            store.list_cards(None).expect_err("offline").kind(),
            ErrorKind::Unavailable
        );
        assert_eq!(store.ping().expect_err("offline").kind(), ErrorKind::Unavailable);
        store.set_offline(false);
        store.ping().expect("online");
    }
}
