//! Purpose: Card record model, identifiers, and input validation.
//! Exports: `Card`, `CardFields`, `CardUpdate`, identifier helpers, field-name constants, timestamps.
//! Role: Shared by the gateway (validating bodies) and the client (typed records).
//! Invariants: `name` is non-empty and `elixirCost` is a positive integer on every valid card.
//! Invariants: Identifiers are `card::<uuid>` and never change after creation.
//! Invariants: Empty optional fields are absent, never stored as "".
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;
use uuid::Uuid;

use crate::core::error::{Error, ErrorKind};

pub const ID_PREFIX: &str = "card::";
pub const ID_FIELD: &str = "_id";
pub const KIND_FIELD: &str = "docType";
pub const KIND: &str = "card";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

pub const NAME: &str = "name";
pub const ELIXIR_COST: &str = "elixirCost";
pub const RARITY: &str = "rarity";
pub const CARD_TYPE: &str = "type";
pub const IMAGE_URL: &str = "imageUrl";
pub const EVOLUTION_IMAGE_URL: &str = "evolutionImageUrl";
pub const EXTRA_IMAGE_URL: &str = "extraImageUrl";

pub const OPTIONAL_FIELDS: [&str; 5] = [
    RARITY,
    CARD_TYPE,
    IMAGE_URL,
    EVOLUTION_IMAGE_URL,
    EXTRA_IMAGE_URL,
];

/// Envelope key older clients nested business fields under.
pub const LEGACY_ENVELOPE: &str = "data";

/// Business fields of a card as submitted by a client.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardFields {
    pub name: String,
    pub elixir_cost: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rarity: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub card_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evolution_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_image_url: Option<String>,
}

/// An update request: the submitted fields plus the optional keys it explicitly blanked.
///
/// A key sent as `null` or `""` is cleared on the stored card; a key left out
/// keeps its stored value.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CardUpdate {
    pub fields: CardFields,
    pub cleared: Vec<&'static str>,
}

/// A stored card in the flat shape the gateway returns.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Card {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub fields: CardFields,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl CardFields {
    pub fn new(name: impl Into<String>, elixir_cost: u32) -> Self {
        Self {
            name: name.into(),
            elixir_cost,
            ..Self::default()
        }
    }

    /// Parses and validates a request body.
    ///
    /// Accepts the flat shape and the legacy `{"data": {...}}` envelope. When both
    /// carry a field, the top-level value wins.
    pub fn from_body(body: &Value) -> Result<Self, Error> {
        let fields = lift_envelope(body)?;

        let name = match fields.get(NAME) {
            None | Some(Value::Null) => return Err(missing(NAME)),
            Some(Value::String(name)) => name.trim().to_string(),
            Some(_) => return Err(invalid(format!("{NAME} must be a string"))),
        };
        let elixir_cost = match fields.get(ELIXIR_COST) {
            None | Some(Value::Null) => return Err(missing(ELIXIR_COST)),
            Some(Value::Number(number)) => number
                .as_u64()
                .and_then(|cost| u32::try_from(cost).ok())
                .ok_or_else(|| invalid(format!("{ELIXIR_COST} must be a positive integer")))?,
            Some(_) => return Err(invalid(format!("{ELIXIR_COST} must be a positive integer"))),
        };

        let card = Self {
            name,
            elixir_cost,
            rarity: optional_text(&fields, RARITY)?,
            card_type: optional_text(&fields, CARD_TYPE)?,
            image_url: optional_text(&fields, IMAGE_URL)?,
            evolution_image_url: optional_text(&fields, EVOLUTION_IMAGE_URL)?,
            extra_image_url: optional_text(&fields, EXTRA_IMAGE_URL)?,
        };
        card.validate()?;
        Ok(card)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(invalid(format!("{NAME} must not be empty")));
        }
        if self.elixir_cost == 0 {
            return Err(invalid(format!("{ELIXIR_COST} must be a positive integer")));
        }
        for (key, value) in [
            (IMAGE_URL, &self.image_url),
            (EVOLUTION_IMAGE_URL, &self.evolution_image_url),
            (EXTRA_IMAGE_URL, &self.extra_image_url),
        ] {
            if let Some(value) = value {
                validate_image_url(key, value)?;
            }
        }
        Ok(())
    }

    /// Field/value pairs in stored form, optional fields only when present.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(NAME.to_string(), Value::from(self.name.clone()));
        map.insert(ELIXIR_COST.to_string(), Value::from(self.elixir_cost));
        for (key, value) in self.optional_fields() {
            if let Some(value) = value {
                map.insert(key.to_string(), Value::from(value));
            }
        }
        map
    }

    /// Body for a full replacement: absent optional fields are sent as `null`.
    pub fn to_replacement(&self) -> Value {
        let mut map = self.to_map();
        for (key, value) in self.optional_fields() {
            if value.is_none() {
                map.insert(key.to_string(), Value::Null);
            }
        }
        Value::Object(map)
    }

    pub fn optional_fields(&self) -> [(&'static str, Option<&str>); 5] {
        [
            (RARITY, self.rarity.as_deref()),
            (CARD_TYPE, self.card_type.as_deref()),
            (IMAGE_URL, self.image_url.as_deref()),
            (EVOLUTION_IMAGE_URL, self.evolution_image_url.as_deref()),
            (EXTRA_IMAGE_URL, self.extra_image_url.as_deref()),
        ]
    }
}

impl CardUpdate {
    pub fn from_body(body: &Value) -> Result<Self, Error> {
        let fields = CardFields::from_body(body)?;
        let supplied = lift_envelope(body)?;
        let cleared = OPTIONAL_FIELDS
            .into_iter()
            .filter(|key| match supplied.get(*key) {
                Some(Value::Null) => true,
                Some(Value::String(text)) => text.trim().is_empty(),
                _ => false,
            })
            .collect();
        Ok(Self { fields, cleared })
    }
}

impl From<CardFields> for CardUpdate {
    fn from(fields: CardFields) -> Self {
        Self {
            fields,
            cleared: Vec::new(),
        }
    }
}

pub fn new_card_id() -> String {
    format!("{ID_PREFIX}{}", Uuid::new_v4())
}

/// True when `id` lives in the card namespace.
pub fn is_card_id(id: &str) -> bool {
    id.strip_prefix(ID_PREFIX)
        .is_some_and(|rest| !rest.is_empty())
}

pub fn now_rfc3339() -> Result<String, Error> {
    OffsetDateTime::now_utc().format(&Rfc3339).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to format timestamp")
            .with_source(err)
    })
}

/// Parses an RFC 3339 timestamp for ordering; unparsable values yield `None`.
pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}

fn lift_envelope(body: &Value) -> Result<Map<String, Value>, Error> {
    let Value::Object(object) = body else {
        return Err(invalid("request body must be a JSON object"));
    };

    let mut fields = Map::new();
    let enveloped = match object.get(LEGACY_ENVELOPE) {
        None | Some(Value::Null) => false,
        Some(Value::Object(inner)) => {
            fields.extend(inner.iter().map(|(key, value)| (key.clone(), value.clone())));
            true
        }
        Some(_) => return Err(invalid(format!("{LEGACY_ENVELOPE} must be an object"))),
    };

    for (key, value) in object {
        if key == LEGACY_ENVELOPE {
            continue;
        }
        // Enveloped bodies used top-level `type` as the record discriminator.
        if enveloped && key == CARD_TYPE && value.as_str() == Some(KIND) {
            continue;
        }
        fields.insert(key.clone(), value.clone());
    }
    Ok(fields)
}

fn optional_text(fields: &Map<String, Value>, key: &str) -> Result<Option<String>, Error> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => {
            let text = text.trim();
            Ok((!text.is_empty()).then(|| text.to_string()))
        }
        Some(_) => Err(invalid(format!("{key} must be a string"))),
    }
}

fn validate_image_url(key: &str, value: &str) -> Result<(), Error> {
    let url = Url::parse(value).map_err(|err| {
        invalid(format!("{key} must be an absolute http(s) url")).with_source(err)
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!("{key} must use http or https")));
    }
    Ok(())
}

fn missing(key: &str) -> Error {
    invalid(format!("missing required field: {key}"))
        .with_hint("Cards require name and elixirCost.")
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Invalid).with_message(message)
}
