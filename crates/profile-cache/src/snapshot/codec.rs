//! JSON snapshot codec.
//!
//! The on-disk shape is a single object keyed by UUID string:
//!
//! ```text
//! {
//!   "<uuid>": {
//!     "name": "Ash",
//!     "uuid": "<uuid>",
//!     "properties": { "textures": { "name": "textures", "value": "...", "signature": "..." } },
//!     "cachedAt": 1700000000000,
//!     "version": "1.1.0"
//!   }
//! }
//! ```
//!
//! Every stored field is optional on read. Missing values decode to empty
//! defaults and are caught later by record validation instead of failing
//! the whole snapshot.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{CacheError, CacheResult};
use crate::model::{Attribute, Identity, Record};

/// In-memory table keyed by profile id.
pub type Table = HashMap<Uuid, Record>;

/// Result of decoding a snapshot document.
#[derive(Debug, Default)]
pub struct DecodedSnapshot {
    /// Decoded records, valid or not.
    pub records: Table,

    /// Entries dropped because their key or body could not be decoded.
    pub skipped: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoredRecord {
    name: Option<String>,
    uuid: Option<String>,
    properties: Option<BTreeMap<String, StoredProperty>>,
    #[serde(rename = "cachedAt")]
    cached_at: Option<i64>,
    version: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoredProperty {
    name: Option<String>,
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
}

impl StoredRecord {
    fn from_record(record: &Record) -> Self {
        let identity = record.identity();
        let properties = record
            .attributes()
            .iter()
            .map(|(key, attr)| {
                (
                    key.clone(),
                    StoredProperty {
                        name: Some(attr.name.clone()),
                        value: Some(attr.value.clone()),
                        signature: attr.signature.clone(),
                    },
                )
            })
            .collect();

        Self {
            name: Some(identity.name().to_string()),
            uuid: Some(identity.id().to_string()),
            properties: Some(properties),
            cached_at: Some(identity.cached_at()),
            version: Some(identity.schema_version().to_string()),
        }
    }

    fn into_record(self) -> Record {
        let id = self
            .uuid
            .as_deref()
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .unwrap_or_else(Uuid::nil);

        let attributes = self
            .properties
            .unwrap_or_default()
            .into_iter()
            .map(|(key, prop)| {
                let attribute = Attribute {
                    name: prop.name.unwrap_or_else(|| key.clone()),
                    value: prop.value.unwrap_or_default(),
                    signature: prop.signature,
                };
                (key, attribute)
            })
            .collect();

        Record::new(
            Identity::from_parts(
                id,
                self.name.unwrap_or_default(),
                self.cached_at.unwrap_or(0),
                self.version.unwrap_or_default(),
            ),
            attributes,
        )
    }
}

/// Decode a snapshot document.
///
/// Fails only when the document as a whole is unusable (not JSON, not an
/// object, `null`, or blank). Individual entries with an unparseable key,
/// a non-object body, or an embedded id that disagrees with their key are
/// skipped and counted.
pub fn decode(text: &str) -> CacheResult<DecodedSnapshot> {
    if text.trim().is_empty() {
        return Err(CacheError::Decode {
            message: "snapshot is empty".to_string(),
        });
    }

    let document: Option<BTreeMap<String, serde_json::Value>> = serde_json::from_str(text)?;
    let document = document.ok_or_else(|| CacheError::Decode {
        message: "snapshot contains no data".to_string(),
    })?;

    let mut decoded = DecodedSnapshot::default();
    for (key, body) in document {
        let Ok(id) = Uuid::parse_str(&key) else {
            warn!(key = %key, "skipping snapshot entry with invalid id");
            decoded.skipped += 1;
            continue;
        };

        let stored: StoredRecord = match serde_json::from_value(body) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(%id, error = %e, "skipping undecodable snapshot entry");
                decoded.skipped += 1;
                continue;
            }
        };

        let record = stored.into_record();
        if !record.id().is_nil() && record.id() != id {
            warn!(%id, embedded = %record.id(), "skipping snapshot entry with mismatched id");
            decoded.skipped += 1;
            continue;
        }

        decoded.records.insert(id, record);
    }

    Ok(decoded)
}

/// Encode the table as a pretty-printed document with keys in sorted order.
pub fn encode(table: &Table) -> CacheResult<String> {
    let document: BTreeMap<String, StoredRecord> = table
        .iter()
        .map(|(id, record)| (id.to_string(), StoredRecord::from_record(record)))
        .collect();

    serde_json::to_string_pretty(&document).map_err(|e| CacheError::Decode {
        message: format!("failed to serialize snapshot: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Profile, TEXTURES};

    fn sample_record(name: &str) -> Record {
        let profile = Profile::new(Uuid::new_v4(), name)
            .with_property(Attribute::signed(TEXTURES, "dGV4dHVyZQ==", "c2ln"));
        Record::from_profile(&profile).unwrap()
    }

    #[test]
    fn test_encode_then_decode_preserves_records() {
        let a = sample_record("Ash");
        let b = sample_record("Misty");
        let table: Table = [(a.id(), a.clone()), (b.id(), b.clone())].into();

        let text = encode(&table).unwrap();
        let decoded = decode(&text).unwrap();

        assert_eq!(decoded.skipped, 0);
        assert_eq!(decoded.records.get(&a.id()), Some(&a));
        assert_eq!(decoded.records.get(&b.id()), Some(&b));
    }

    #[test]
    fn test_encode_uses_wire_field_names() {
        let record = sample_record("Ash");
        let table: Table = [(record.id(), record.clone())].into();
        let value: serde_json::Value = serde_json::from_str(&encode(&table).unwrap()).unwrap();

        let entry = &value[record.id().to_string()];
        assert_eq!(entry["name"], "Ash");
        assert_eq!(entry["uuid"], record.id().to_string());
        assert_eq!(entry["version"], "1.1.0");
        assert!(entry["cachedAt"].as_i64().unwrap() > 0);
        assert_eq!(entry["properties"][TEXTURES]["signature"], "c2ln");
    }

    #[test]
    fn test_decode_tolerates_missing_and_extra_fields() {
        let id = Uuid::new_v4();
        let text = format!(
            r#"{{"{id}": {{"uuid": "{id}", "name": "Brock", "cachedAt": 5, "extra": true,
                 "properties": {{"textures": {{"value": "abc"}}}}}}}}"#
        );
        let decoded = decode(&text).unwrap();
        let record = decoded.records.get(&id).unwrap();

        // version is absent, so the record decodes but is not valid
        assert_eq!(record.identity().schema_version(), "");
        assert!(!record.is_valid());
        let textures = record.attribute(TEXTURES).unwrap();
        assert_eq!(textures.name, TEXTURES);
        assert_eq!(textures.signature, None);
    }

    #[test]
    fn test_decode_skips_bad_entries() {
        let good = Uuid::new_v4();
        let other = Uuid::new_v4();
        let text = format!(
            r#"{{
                "not-a-uuid": {{"name": "x"}},
                "{good}": {{"uuid": "{good}", "name": "Ash", "cachedAt": 1, "version": "1.1.0"}},
                "{other}": 42
            }}"#
        );
        let decoded = decode(&text).unwrap();
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.skipped, 2);
    }

    #[test]
    fn test_decode_rejects_mismatched_embedded_id() {
        let key = Uuid::new_v4();
        let embedded = Uuid::new_v4();
        let text = format!(
            r#"{{"{key}": {{"uuid": "{embedded}", "name": "Ash", "cachedAt": 1, "version": "1.1.0"}}}}"#
        );
        let decoded = decode(&text).unwrap();
        assert!(decoded.records.is_empty());
        assert_eq!(decoded.skipped, 1);
    }

    #[test]
    fn test_decode_whole_document_failures() {
        assert!(matches!(decode(""), Err(CacheError::Decode { .. })));
        assert!(matches!(decode("null"), Err(CacheError::Decode { .. })));
        assert!(matches!(decode("[1, 2]"), Err(CacheError::Decode { .. })));
        assert!(matches!(decode(r#"{"a": "#), Err(CacheError::Decode { .. })));
    }

    #[test]
    fn test_decode_empty_object() {
        let decoded = decode("{}").unwrap();
        assert!(decoded.records.is_empty());
        assert_eq!(decoded.skipped, 0);
    }
}
