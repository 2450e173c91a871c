//! Identity records and the profile shape exchanged with collaborators.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Schema version stamped on every record created by this crate.
pub const SCHEMA_VERSION: &str = "1.1.0";

/// Well-known attribute carrying signed skin texture data.
pub const TEXTURES: &str = "textures";

/// Identity half of a cached record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    id: Uuid,
    name: String,
    cached_at: i64,
    schema_version: String,
}

impl Identity {
    /// Build an identity stamped with the current time and [`SCHEMA_VERSION`].
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self::from_parts(id, name, Utc::now().timestamp_millis(), SCHEMA_VERSION)
    }

    /// Build an identity from stored fields, without validation.
    pub fn from_parts(
        id: Uuid,
        name: impl Into<String>,
        cached_at: i64,
        schema_version: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            cached_at,
            schema_version: schema_version.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn cached_at(&self) -> i64 {
        self.cached_at
    }

    /// Creation time as a UTC timestamp, if representable.
    pub fn cached_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.cached_at).single()
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// An identity is usable only with a non-nil id, a name, a positive
    /// timestamp and a schema version.
    pub fn is_valid(&self) -> bool {
        !self.id.is_nil()
            && !self.name.is_empty()
            && self.cached_at > 0
            && !self.schema_version.is_empty()
    }
}

/// A named, optionally signed attribute value (e.g. `textures`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    pub signature: Option<String>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            signature: None,
        }
    }

    pub fn signed(
        name: impl Into<String>,
        value: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            signature: Some(signature.into()),
        }
    }

    pub fn is_signed(&self) -> bool {
        self.signature.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Profile as supplied by (and handed back to) collaborators.
///
/// `properties` follows the upstream format, which allows several values
/// under one name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    pub id: Option<Uuid>,
    pub name: String,
    pub properties: Vec<Attribute>,
}

impl Profile {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: name.into(),
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, attribute: Attribute) -> Self {
        self.properties.push(attribute);
        self
    }

    pub fn has_properties(&self) -> bool {
        !self.properties.is_empty()
    }
}

/// Cached identity plus its attributes, at most one per name.
///
/// Immutable once built; the store hands out clones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    identity: Identity,
    attributes: BTreeMap<String, Attribute>,
}

impl Record {
    pub fn new(identity: Identity, attributes: BTreeMap<String, Attribute>) -> Self {
        Self {
            identity,
            attributes,
        }
    }

    /// Convert a collaborator profile into a fresh record.
    ///
    /// Returns `None` when the profile carries no id. Repeated property
    /// names collapse to the last value seen.
    pub fn from_profile(profile: &Profile) -> Option<Self> {
        let id = profile.id?;
        let mut attributes = BTreeMap::new();
        for property in &profile.properties {
            attributes.insert(property.name.clone(), property.clone());
        }
        Some(Self::new(Identity::new(id, profile.name.clone()), attributes))
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn id(&self) -> Uuid {
        self.identity.id
    }

    pub fn attributes(&self) -> &BTreeMap<String, Attribute> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn has_textures(&self) -> bool {
        self.attributes.contains_key(TEXTURES)
    }

    pub fn is_valid(&self) -> bool {
        self.identity.is_valid()
    }

    /// Rebuild the collaborator-facing profile.
    pub fn to_profile(&self) -> Profile {
        Profile {
            id: Some(self.identity.id),
            name: self.identity.name.clone(),
            properties: self.attributes.values().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_profile_without_id() {
        let profile = Profile {
            id: None,
            name: "Ash".to_string(),
            properties: vec![],
        };
        assert!(Record::from_profile(&profile).is_none());
    }

    #[test]
    fn test_from_profile_collapses_duplicate_names() {
        let id = Uuid::new_v4();
        let profile = Profile::new(id, "Ash")
            .with_property(Attribute::new(TEXTURES, "old"))
            .with_property(Attribute::signed(TEXTURES, "new", "sig"))
            .with_property(Attribute::new("cape", "red"));

        let record = Record::from_profile(&profile).unwrap();
        assert_eq!(record.attribute_count(), 2);
        let textures = record.attribute(TEXTURES).unwrap();
        assert_eq!(textures.value, "new");
        assert!(textures.is_signed());
        assert!(record.has_textures());
        assert!(record.is_valid());
        assert_eq!(record.identity().schema_version(), SCHEMA_VERSION);
    }

    #[test]
    fn test_validity_rules() {
        let id = Uuid::new_v4();
        assert!(Identity::from_parts(id, "Ash", 1, "1.1.0").is_valid());
        assert!(!Identity::from_parts(id, "", 1, "1.1.0").is_valid());
        assert!(!Identity::from_parts(id, "Ash", 0, "1.1.0").is_valid());
        assert!(!Identity::from_parts(id, "Ash", 1, "").is_valid());
        assert!(!Identity::from_parts(Uuid::nil(), "Ash", 1, "1.1.0").is_valid());
    }

    #[test]
    fn test_to_profile_roundtrip_keeps_attributes() {
        let id = Uuid::new_v4();
        let profile = Profile::new(id, "Misty").with_property(Attribute::signed(
            TEXTURES,
            "eyJ0ZXh0dXJlcyI6e319",
            "c2ln",
        ));
        let record = Record::from_profile(&profile).unwrap();
        assert_eq!(record.to_profile(), profile);
        assert!(record.identity().cached_at_utc().is_some());
    }
}
