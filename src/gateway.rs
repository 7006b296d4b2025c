//! Purpose: The five card operations, independent of HTTP.
//! Exports: `Gateway`, `GatewayOptions`, `Record`.
//! Role: Validates input, performs one logical store operation, returns flat records.
//! Invariants: Returned records are flat and carry their identifier under `_id`.
//! Invariants: Updates and deletes are read-then-write guarded by the store's CAS token.
//! Invariants: Identifiers outside the `card::` namespace are reported as not found.
use std::cmp::Ordering;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use crate::core::card::{
    CREATED_AT, CardFields, CardUpdate, ID_FIELD, is_card_id, new_card_id, now_rfc3339,
    parse_timestamp,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::shape::{is_card_document, merge_update, new_document, to_flat_record};
use crate::store::DocumentStore;

/// A card in its flat wire shape, unknown stored fields included.
pub type Record = Map<String, Value>;

#[derive(Clone, Debug, Default)]
pub struct GatewayOptions {
    pub list_limit: Option<usize>,
}

#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn DocumentStore>,
    options: GatewayOptions,
}

impl Gateway {
    pub fn new(store: Arc<dyn DocumentStore>, options: GatewayOptions) -> Self {
        Self { store, options }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Checks that the backing store answers; used once at startup.
    pub fn probe(&self) -> Result<(), Error> {
        self.store.ping()
    }

    pub fn list(&self) -> Result<Vec<Record>, Error> {
        let rows = self.store.list_cards(self.options.list_limit)?;
        let mut records: Vec<Record> = rows
            .into_iter()
            .filter_map(|(id, document)| to_flat_record(&id, document))
            .collect();
        records.sort_by(compare_records);
        info!(count = records.len(), "listed cards");
        Ok(records)
    }

    pub fn create(&self, body: &Value) -> Result<String, Error> {
        let fields = CardFields::from_body(body)?;
        let id = new_card_id();
        let document = new_document(&fields, &now_rfc3339()?);
        self.store.insert(&id, &document).map_err(|err| {
            if err.kind() == ErrorKind::Conflict {
                Error::new(ErrorKind::Internal)
                    .with_message("generated identifier already exists")
                    .with_id(id.clone())
                    .with_source(err)
            } else {
                err
            }
        })?;
        info!(id = %id, name = %fields.name, "created card");
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<Record, Error> {
        ensure_card_id(id)?;
        let current = self.store.get(id).map_err(|err| card_error(err, id))?;
        to_flat_record(id, current.document).ok_or_else(|| not_found(id))
    }

    pub fn update(&self, id: &str, body: &Value) -> Result<String, Error> {
        let update = CardUpdate::from_body(body)?;
        ensure_card_id(id)?;

        let current = self.store.get(id).map_err(|err| card_error(err, id))?;
        if !is_card_document(&current.document) {
            return Err(not_found(id));
        }
        let Value::Object(existing) = current.document else {
            return Err(not_found(id));
        };

        let merged = merge_update(existing, &update, &now_rfc3339()?);
        self.store
            .replace(id, &merged, current.cas.as_deref())
            .map_err(|err| card_error(err, id))?;
        info!(id = %id, "updated card");
        Ok(id.to_string())
    }

    pub fn delete(&self, id: &str) -> Result<String, Error> {
        ensure_card_id(id)?;
        let current = self.store.get(id).map_err(|err| card_error(err, id))?;
        if !is_card_document(&current.document) {
            return Err(not_found(id));
        }
        self.store
            .remove(id, current.cas.as_deref())
            .map_err(|err| card_error(err, id))?;
        info!(id = %id, "deleted card");
        Ok(id.to_string())
    }
}

fn compare_records(left: &Record, right: &Record) -> Ordering {
    let created = |record: &Record| {
        record
            .get(CREATED_AT)
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
    };
    let id = |record: &Record| {
        record
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    created(left)
        .cmp(&created(right))
        .then_with(|| id(left).cmp(&id(right)))
}

fn ensure_card_id(id: &str) -> Result<(), Error> {
    if is_card_id(id) {
        Ok(())
    } else {
        Err(not_found(id))
    }
}

fn card_error(err: Error, id: &str) -> Error {
    match err.kind() {
        ErrorKind::NotFound => not_found(id),
        ErrorKind::Conflict => err
            .with_id(id)
            .with_hint("The card changed while saving; reload it and retry."),
        _ => err,
    }
}

fn not_found(id: &str) -> Error {
    Error::new(ErrorKind::NotFound)
        .with_message("card not found")
        .with_id(id)
}

#[cfg(test)]
mod tests {
    use super::{Gateway, GatewayOptions};
    use crate::core::error::ErrorKind;
    use crate::store::{DocumentStore, MemoryStore, StoreResult, Versioned};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn gateway() -> (Gateway, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            Gateway::new(store.clone(), GatewayOptions::default()),
            store,
        )
    }

    #[test]
    fn create_then_get_returns_submitted_fields() {
        let (gateway, _) = gateway();
        let id = gateway
            .create(&json!({"name": "Giant", "elixirCost": 5, "rarity": "Rare"}))
            .expect("create");
        assert!(id.starts_with("card::"));
        assert!(id.len() > "card::".len());

        let record = gateway.get(&id).expect("get");
        assert_eq!(record["_id"], Value::from(id.as_str()));
        assert_eq!(record["name"], "Giant");
        assert_eq!(record["elixirCost"], 5);
        assert_eq!(record["rarity"], "Rare");
        assert_eq!(record["docType"], "card");
        assert!(record["createdAt"].as_str().is_some_and(|at| !at.is_empty()));
        assert!(!record.contains_key("updatedAt"));
    }

    #[test]
    fn create_without_elixir_cost_persists_nothing() {
        let (gateway, store) = gateway();
        let err = gateway
            .create(&json!({"name": "Giant"}))
            .expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert!(store.is_empty());
    }

    #[test]
    fn list_is_empty_without_cards() {
        let (gateway, _) = gateway();
        assert!(gateway.list().expect("list").is_empty());
    }

    #[test]
    fn list_returns_flat_cards_only() {
        let (gateway, store) = gateway();
        let id = gateway
            .create(&json!({"name": "Giant", "elixirCost": 5}))
            .expect("create");
        store
            .insert("deck::1", &json!({"docType": "deck", "name": "Hog cycle"}))
            .expect("insert");

        let records = gateway.list().expect("list");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record["_id"], Value::from(id.as_str()));
        assert_eq!(record["name"], "Giant");
        assert_eq!(record["elixirCost"], 5);
        assert!(record.contains_key("createdAt"));
        assert!(!record.contains_key("data"));
    }

    #[test]
    fn list_orders_by_creation_time() {
        let (gateway, store) = gateway();
        store
            .insert(
                "card::b",
                &json!({"docType": "card", "name": "Late", "elixirCost": 1, "createdAt": "2026-01-02T00:00:00Z"}),
            )
            .expect("insert");
        store
            .insert(
                "card::c",
                &json!({"docType": "card", "name": "Early", "elixirCost": 1, "createdAt": "2026-01-01T00:00:00.5Z"}),
            )
            .expect("insert");
        let names: Vec<_> = gateway
            .list()
            .expect("list")
            .iter()
            .map(|record| record["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("Early"), json!("Late")]);
    }

    #[test]
    fn legacy_documents_are_listed_flat() {
        let (gateway, store) = gateway();
        store
            .insert(
                "card::legacy",
                &json!({"type": "card", "data": {"name": "Giant", "elixirCost": 5}}),
            )
            .expect("insert");
        let record = gateway.get("card::legacy").expect("get");
        assert_eq!(record["name"], "Giant");
        assert_eq!(record["docType"], "card");
        assert!(!record.contains_key("data"));
    }

    #[test]
    fn update_preserves_envelope_and_overwrites_supplied_fields() {
        let (gateway, store) = gateway();
        let id = gateway
            .create(&json!({"name": "Giant", "elixirCost": 5, "rarity": "Rare"}))
            .expect("create");
        let created_at = gateway.get(&id).expect("get")["createdAt"].clone();

        gateway
            .update(&id, &json!({"name": "Giant", "elixirCost": 6, "type": "Troop"}))
            .expect("update");

        let stored = store.get(&id).expect("stored").document;
        assert_eq!(stored["docType"], "card");
        assert_eq!(stored["createdAt"], created_at);
        assert_eq!(stored["elixirCost"], 6);
        assert_eq!(stored["rarity"], "Rare");
        assert_eq!(stored["type"], "Troop");
        assert!(stored["updatedAt"].as_str().is_some());
    }

    #[test]
    fn update_missing_card_is_not_found() {
        let (gateway, _) = gateway();
        let err = gateway
            .update("card::missing", &json!({"name": "Giant", "elixirCost": 5}))
            .expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.id(), Some("card::missing"));
    }

    #[test]
    fn update_validates_before_touching_the_store() {
        let (gateway, store) = gateway();
        store.set_offline(true);
        let err = gateway
            .update("card::1", &json!({"name": "Giant"}))
            .expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn foreign_identifiers_are_not_found() {
        let (gateway, store) = gateway();
        store
            .insert("deck::1", &json!({"docType": "deck"}))
            .expect("insert");
        for result in [
            gateway.get("deck::1").map(|_| ()),
            gateway.delete("deck::1").map(|_| ()),
            gateway
                .update("deck::1", &json!({"name": "x", "elixirCost": 1}))
                .map(|_| ()),
        ] {
            assert_eq!(result.expect_err("foreign").kind(), ErrorKind::NotFound);
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn other_kinds_in_card_namespace_are_not_deleted() {
        let (gateway, store) = gateway();
        store
            .insert("card::x", &json!({"docType": "deck"}))
            .expect("insert");
        let err = gateway.delete("card::x").expect_err("not a card");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.id(), Some("card::x"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_clears_blanked_optional_fields() {
        let (gateway, store) = gateway();
        let id = gateway
            .create(&json!({"name": "Giant", "elixirCost": 5, "rarity": "Rare", "type": "Troop"}))
            .expect("create");

        gateway
            .update(&id, &json!({"name": "Giant", "elixirCost": 5, "rarity": ""}))
            .expect("blank rarity");
        let stored = store.get(&id).expect("stored").document;
        assert!(stored.get("rarity").is_none());
        assert_eq!(stored["type"], "Troop");

        gateway
            .update(&id, &json!({"name": "Giant", "elixirCost": 5, "type": null}))
            .expect("null type");
        let record = gateway.get(&id).expect("get");
        assert!(!record.contains_key("type"));
        assert!(!record.contains_key("rarity"));
    }

    #[test]
    fn list_limit_keeps_the_earliest_cards() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(
                "card::a",
                &json!({"docType": "card", "name": "Late", "elixirCost": 1, "createdAt": "2026-01-02T00:00:00Z"}),
            )
            .expect("insert");
        store
            .insert(
                "card::b",
                &json!({"docType": "card", "name": "Early", "elixirCost": 1, "createdAt": "2026-01-01T00:00:00Z"}),
            )
            .expect("insert");
        let gateway = Gateway::new(store, GatewayOptions { list_limit: Some(1) });
        let names: Vec<_> = gateway
            .list()
            .expect("list")
            .iter()
            .map(|record| record["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("Early")]);
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let (gateway, _) = gateway();
        let id = gateway
            .create(&json!({"name": "Giant", "elixirCost": 5}))
            .expect("create");
        assert_eq!(gateway.delete(&id).expect("delete"), id);
        assert_eq!(gateway.get(&id).expect_err("gone").kind(), ErrorKind::NotFound);
        assert_eq!(gateway.delete(&id).expect_err("gone").kind(), ErrorKind::NotFound);
    }

    #[test]
    fn offline_store_reports_unavailable() {
        let (gateway, store) = gateway();
        store.set_offline(true);
        assert_eq!(gateway.list().expect_err("offline").kind(), ErrorKind::Unavailable);
        assert_eq!(
            gateway
                .create(&json!({"name": "Giant", "elixirCost": 5}))
                .expect_err("offline")
                .kind(),
            ErrorKind::Unavailable
        );
        assert!(gateway.probe().is_err());
    }

    /// Writes a competing version right after every read.
    struct RacingStore {
        inner: MemoryStore,
    }

    impl DocumentStore for RacingStore {
        fn get(&self, id: &str) -> StoreResult<Versioned> {
            let current = self.inner.get(id)?;
            self.inner.replace(id, &current.document, None)?;
            Ok(current)
        }

        fn insert(&self, id: &str, document: &Value) -> StoreResult<()> {
            self.inner.insert(id, document)
        }

        fn replace(&self, id: &str, document: &Value, cas: Option<&str>) -> StoreResult<()> {
            self.inner.replace(id, document, cas)
        }

        fn remove(&self, id: &str, cas: Option<&str>) -> StoreResult<()> {
            self.inner.remove(id, cas)
        }

        fn list_cards(&self, limit: Option<usize>) -> StoreResult<Vec<(String, Value)>> {
            self.inner.list_cards(limit)
        }

        fn ping(&self) -> StoreResult<()> {
            self.inner.ping()
        }

        fn backend_name(&self) -> &'static str {
            "racing"
        }
    }

    #[test]
    fn concurrent_modification_is_a_conflict() {
        let store = RacingStore {
            inner: MemoryStore::new(),
        };
        store
            .insert(
                "card::1",
                &json!({"docType": "card", "name": "Giant", "elixirCost": 5}),
            )
            .expect("insert");
        let gateway = Gateway::new(Arc::new(store), GatewayOptions::default());
        let err = gateway
            .update("card::1", &json!({"name": "Giant", "elixirCost": 7}))
            .expect_err("stale");
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
