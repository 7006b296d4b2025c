//! Purpose: Reconcile stored document shapes and merge updates onto them.
//! Exports: `normalize_stored`, `to_flat_record`, `is_card_document`, `new_document`, `merge_update`.
//! Role: Pure functions between the gateway and the document store; no I/O.
//! Invariants: Output documents are flat and carry `docType: "card"`.
//! Invariants: Fields the merge does not recognise are carried over untouched.
//! Notes: Older documents used `type: "card"` as discriminator, sometimes with a nested `data` map.
use serde_json::{Map, Value};

use crate::core::card::{
    CARD_TYPE, CREATED_AT, CardFields, CardUpdate, ID_FIELD, KIND, KIND_FIELD, LEGACY_ENVELOPE,
    UPDATED_AT,
};

/// True when a stored document belongs to the card kind, in any known shape.
pub fn is_card_document(document: &Value) -> bool {
    let Value::Object(object) = document else {
        return false;
    };
    match object.get(KIND_FIELD) {
        Some(kind) => kind.as_str() == Some(KIND),
        None => object.get(CARD_TYPE).and_then(Value::as_str) == Some(KIND),
    }
}

/// Converts a stored document to the current flat shape, or `None` if it is not a card.
pub fn normalize_stored(document: Value) -> Option<Map<String, Value>> {
    if !is_card_document(&document) {
        return None;
    }
    let Value::Object(mut object) = document else {
        return None;
    };
    object.remove(ID_FIELD);
    if object.contains_key(KIND_FIELD) {
        return Some(object);
    }

    // Legacy: `type` held the discriminator, business fields were flat or under `data`.
    object.remove(CARD_TYPE);
    let mut flat = match object.remove(LEGACY_ENVELOPE) {
        Some(Value::Object(inner)) => inner,
        Some(other) => {
            object.insert(LEGACY_ENVELOPE.to_string(), other);
            Map::new()
        }
        None => Map::new(),
    };
    flat.extend(object);
    flat.insert(KIND_FIELD.to_string(), Value::from(KIND));
    Some(flat)
}

/// Flat, client-ready record: the normalized document with `_id` attached.
pub fn to_flat_record(id: &str, document: Value) -> Option<Map<String, Value>> {
    let mut record = normalize_stored(document)?;
    record.insert(ID_FIELD.to_string(), Value::from(id));
    Some(record)
}

pub fn new_document(fields: &CardFields, now: &str) -> Value {
    let mut document = fields.to_map();
    document.insert(KIND_FIELD.to_string(), Value::from(KIND));
    document.insert(CREATED_AT.to_string(), Value::from(now));
    Value::Object(document)
}

/// Overlays `update` on an existing stored document.
///
/// Required fields are always overwritten. Optional fields are overwritten when
/// supplied and removed when cleared. Everything else in `existing` (creation
/// time, unknown keys) is preserved.
pub fn merge_update(existing: Map<String, Value>, update: &CardUpdate, now: &str) -> Value {
    let mut merged = normalize_stored(Value::Object(existing.clone())).unwrap_or(existing);
    merged.remove(ID_FIELD);
    for key in &update.cleared {
        merged.remove(*key);
    }
    merged.extend(update.fields.to_map());
    merged.insert(KIND_FIELD.to_string(), Value::from(KIND));
    merged.insert(UPDATED_AT.to_string(), Value::from(now));
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::{is_card_document, merge_update, new_document, normalize_stored, to_flat_record};
    use crate::core::card::{CardFields, CardUpdate};
    use serde_json::{Value, json};

    fn object(value: Value) -> serde_json::Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn new_document_carries_discriminator_and_creation_time() {
        let document = new_document(&CardFields::new("Giant", 5), "2026-01-01T00:00:00Z");
        assert_eq!(
            document,
            json!({
                "name": "Giant",
                "elixirCost": 5,
                "docType": "card",
                "createdAt": "2026-01-01T00:00:00Z",
            })
        );
    }

    #[test]
    fn flat_record_attaches_id() {
        let stored = json!({"docType": "card", "name": "Giant", "elixirCost": 5});
        let record = to_flat_record("card::1", stored).expect("card");
        assert_eq!(record["_id"], "card::1");
        assert_eq!(record["name"], "Giant");
    }

    #[test]
    fn legacy_envelope_is_flattened() {
        let stored = json!({
            "type": "card",
            "data": {"name": "Giant", "elixirCost": 5},
            "createdAt": "2025-10-01T00:00:00.000Z",
        });
        let record = normalize_stored(stored).expect("card");
        assert_eq!(
            Value::Object(record),
            json!({
                "name": "Giant",
                "elixirCost": 5,
                "docType": "card",
                "createdAt": "2025-10-01T00:00:00.000Z",
            })
        );
    }

    #[test]
    fn legacy_flat_document_is_recognised() {
        let stored = json!({"type": "card", "name": "Archers", "elixirCost": 3});
        let record = normalize_stored(stored).expect("card");
        assert_eq!(record["docType"], "card");
        assert!(!record.contains_key("type"));
    }

    #[test]
    fn other_kinds_are_not_cards() {
        assert!(!is_card_document(&json!({"docType": "deck", "name": "x"})));
        assert!(!is_card_document(&json!({"type": "troop", "name": "x"})));
        assert!(!is_card_document(&json!("card")));
        assert!(normalize_stored(json!({"name": "Giant", "elixirCost": 5})).is_none());
        // A current card whose type attribute is not "card" is still a card.
        assert!(is_card_document(&json!({"docType": "card", "type": "Troop"})));
    }

    #[test]
    fn merge_preserves_unknown_fields_and_creation_time() {
        let existing = object(json!({
            "docType": "card",
            "name": "Giant",
            "elixirCost": 5,
            "rarity": "Rare",
            "createdAt": "2026-01-01T00:00:00Z",
            "arena": 3,
        }));
        let mut fields = CardFields::new("Giant", 6);
        fields.card_type = Some("Troop".to_string());

        let merged = merge_update(existing, &CardUpdate::from(fields), "2026-02-01T00:00:00Z");
        assert_eq!(
            merged,
            json!({
                "docType": "card",
                "name": "Giant",
                "elixirCost": 6,
                "rarity": "Rare",
                "type": "Troop",
                "createdAt": "2026-01-01T00:00:00Z",
                "updatedAt": "2026-02-01T00:00:00Z",
                "arena": 3,
            })
        );
    }

    #[test]
    fn merge_rewrites_legacy_documents_flat() {
        let existing = object(json!({
            "type": "card",
            "data": {"name": "Giant", "elixirCost": 5},
            "createdAt": "2025-10-01T00:00:00.000Z",
        }));
        let update = CardUpdate::from(CardFields::new("Giant", 4));
        let merged = merge_update(existing, &update, "2026-02-01T00:00:00Z");
        assert_eq!(
            merged,
            json!({
                "name": "Giant",
                "elixirCost": 4,
                "docType": "card",
                "createdAt": "2025-10-01T00:00:00.000Z",
                "updatedAt": "2026-02-01T00:00:00Z",
            })
        );
    }

    #[test]
    fn merge_removes_cleared_fields() {
        let existing = object(json!({
            "docType": "card",
            "name": "Giant",
            "elixirCost": 5,
            "rarity": "Rare",
            "type": "Troop",
            "createdAt": "2026-01-01T00:00:00Z",
        }));
        let update = CardUpdate {
            fields: CardFields::new("Giant", 5),
            cleared: vec!["rarity"],
        };
        let merged = merge_update(existing, &update, "2026-02-01T00:00:00Z");
        assert!(merged.get("rarity").is_none());
        assert_eq!(merged["type"], "Troop");
    }
}
