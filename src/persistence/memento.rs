//! Object Mementos
//!
//! A memento is the serialized state of one managed object: enough to
//! rebuild it on another node. Mementos are stored as JSON envelopes with a
//! small `header` (identity and type) and a `body` (state), so the manifest
//! can be built by decoding headers only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::version::PLATFORM_VERSION;
use crate::error::Result;

/// Kind of a managed object, which also selects its key namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Entity,
    Location,
    Policy,
    Enricher,
}

impl ObjectKind {
    /// Every kind, in load order
    pub const ALL: [ObjectKind; 4] = [
        ObjectKind::Location,
        ObjectKind::Entity,
        ObjectKind::Policy,
        ObjectKind::Enricher,
    ];

    /// Store key prefix for this kind
    pub fn prefix(&self) -> &'static str {
        match self {
            ObjectKind::Entity => "entity/",
            ObjectKind::Location => "location/",
            ObjectKind::Policy => "policy/",
            ObjectKind::Enricher => "enricher/",
        }
    }

    /// Store key of an object of this kind
    pub fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix(), id)
    }

    /// Split a store key into kind and id
    pub fn parse_key(key: &str) -> Option<(ObjectKind, &str)> {
        Self::ALL.iter().find_map(|kind| {
            key.strip_prefix(kind.prefix())
                .filter(|id| !id.is_empty())
                .map(|id| (*kind, id))
        })
    }

    /// Activation order: locations first, then entities, then add-ons
    pub fn activation_rank(&self) -> u8 {
        match self {
            ObjectKind::Location => 0,
            ObjectKind::Entity => 1,
            ObjectKind::Policy => 2,
            ObjectKind::Enricher => 3,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Entity => write!(f, "entity"),
            ObjectKind::Location => write!(f, "location"),
            ObjectKind::Policy => write!(f, "policy"),
            ObjectKind::Enricher => write!(f, "enricher"),
        }
    }
}

/// Reference to another managed object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub id: String,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// A config or custom-field value. References to other objects are typed
/// so rebind can resolve them without guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Ref(ObjectRef),
    List(Vec<ConfigValue>),
    Map(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
    /// Every object reference inside this value, depth first
    pub fn references(&self) -> Vec<&ObjectRef> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a ObjectRef>) {
        match self {
            ConfigValue::Ref(reference) => out.push(reference),
            ConfigValue::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            ConfigValue::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(out);
                }
            }
            _ => {}
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::String(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::String(v)
    }
}

impl From<ObjectRef> for ConfigValue {
    fn from(v: ObjectRef) -> Self {
        ConfigValue::Ref(v)
    }
}

/// Serialized state of one managed object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMemento {
    pub id: String,
    pub kind: ObjectKind,
    /// Fully-qualified type tag, opaque to the control plane
    pub type_tag: String,
    pub platform_version: String,
    pub display_name: String,
    pub config: BTreeMap<String, ConfigValue>,
    pub parent_id: Option<String>,
    pub children_ids: Vec<String>,
    pub custom_fields: BTreeMap<String, ConfigValue>,
}

impl ObjectMemento {
    pub fn new(kind: ObjectKind, id: impl Into<String>, type_tag: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            kind,
            type_tag: type_tag.into(),
            platform_version: PLATFORM_VERSION.to_string(),
            config: BTreeMap::new(),
            parent_id: None,
            children_ids: Vec::new(),
            custom_fields: BTreeMap::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_custom_field(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.custom_fields.insert(key.into(), value.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_child(mut self, child_id: impl Into<String>) -> Self {
        self.children_ids.push(child_id.into());
        self
    }

    pub fn with_platform_version(mut self, version: impl Into<String>) -> Self {
        self.platform_version = version.into();
        self
    }

    /// Store key of this memento
    pub fn key(&self) -> String {
        self.kind.key(&self.id)
    }

    /// Every object referenced from config and custom fields
    pub fn references(&self) -> Vec<&ObjectRef> {
        self.config
            .values()
            .chain(self.custom_fields.values())
            .flat_map(|value| value.references())
            .collect()
    }

    pub fn header(&self) -> MementoHeader {
        MementoHeader {
            id: self.id.clone(),
            kind: self.kind,
            type_tag: self.type_tag.clone(),
            platform_version: self.platform_version.clone(),
            parent_id: self.parent_id.clone(),
        }
    }

    /// Encode as a JSON envelope
    pub fn encode(&self) -> Result<Vec<u8>> {
        let envelope = EnvelopeRef {
            header: self.header(),
            body: BodyRef {
                display_name: &self.display_name,
                config: &self.config,
                children_ids: &self.children_ids,
                custom_fields: &self.custom_fields,
            },
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Decode a full JSON envelope
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        let MementoHeader {
            id,
            kind,
            type_tag,
            platform_version,
            parent_id,
        } = envelope.header;
        Ok(Self {
            id,
            kind,
            type_tag,
            platform_version,
            display_name: envelope.body.display_name,
            config: envelope.body.config,
            parent_id,
            children_ids: envelope.body.children_ids,
            custom_fields: envelope.body.custom_fields,
        })
    }

    /// Decode only the header of an envelope
    pub fn decode_header(bytes: &[u8]) -> Result<MementoHeader> {
        let envelope: HeaderOnly = serde_json::from_slice(bytes)?;
        Ok(envelope.header)
    }
}

/// Identity part of a memento envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MementoHeader {
    pub id: String,
    pub kind: ObjectKind,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub platform_version: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    header: MementoHeader,
    body: Body,
}

#[derive(Deserialize)]
struct Body {
    display_name: String,
    #[serde(default)]
    config: BTreeMap<String, ConfigValue>,
    #[serde(default)]
    children_ids: Vec<String>,
    #[serde(default)]
    custom_fields: BTreeMap<String, ConfigValue>,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    header: MementoHeader,
    body: BodyRef<'a>,
}

#[derive(Serialize)]
struct BodyRef<'a> {
    display_name: &'a str,
    config: &'a BTreeMap<String, ConfigValue>,
    children_ids: &'a [String],
    custom_fields: &'a BTreeMap<String, ConfigValue>,
}

#[derive(Deserialize)]
struct HeaderOnly {
    header: MementoHeader,
}

/// Manifest entry for one persisted object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub kind: ObjectKind,
    pub type_tag: String,
    pub platform_version: String,
}

/// Id to type listing of every persisted object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manifest covering the given mementos
    pub fn from_mementos(mementos: &[ObjectMemento]) -> Self {
        let mut manifest = Self::new();
        for memento in mementos {
            manifest.insert(memento.header());
        }
        manifest
    }

    pub fn insert(&mut self, header: MementoHeader) {
        self.entries.insert(
            header.id,
            ManifestEntry {
                kind: header.kind,
                type_tag: header.type_tag,
                platform_version: header.platform_version,
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<&ManifestEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of objects of each kind
    pub fn count_by_kind(&self) -> BTreeMap<ObjectKind, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.kind).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ObjectMemento {
        ObjectMemento::new(ObjectKind::Entity, "app-1", "org.example.WebApp")
            .with_display_name("Web App")
            .with_config("port", 8080i64)
            .with_config("location", ObjectRef::new(ObjectKind::Location, "loc-1"))
            .with_config(
                "members",
                ConfigValue::List(vec![
                    ObjectRef::new(ObjectKind::Entity, "node-1").into(),
                    "literal".into(),
                ]),
            )
            .with_custom_field("owner", "ops")
            .with_child("node-1")
    }

    #[test]
    fn test_envelope_roundtrip() {
        let memento = sample();
        let bytes = memento.encode().unwrap();
        assert_eq!(ObjectMemento::decode(&bytes).unwrap(), memento);

        let header = ObjectMemento::decode_header(&bytes).unwrap();
        assert_eq!(header.id, "app-1");
        assert_eq!(header.type_tag, "org.example.WebApp");
        assert_eq!(header.kind, ObjectKind::Entity);
    }

    #[test]
    fn test_header_readable_without_valid_body_fields() {
        let raw = br#"{"header":{"id":"p1","kind":"policy","type":"x.Restarter","platform_version":"1.0.0"},"body":{"unexpected":true}}"#;
        let header = ObjectMemento::decode_header(raw).unwrap();
        assert_eq!(header.kind, ObjectKind::Policy);
        assert!(ObjectMemento::decode(raw).is_err());
    }

    #[test]
    fn test_references_collected() {
        let memento = sample();
        let ids: Vec<_> = memento.references().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["loc-1", "node-1"]);
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(
            ObjectKind::parse_key("location/loc-1"),
            Some((ObjectKind::Location, "loc-1"))
        );
        assert_eq!(ObjectKind::parse_key("node/n1"), None);
        assert_eq!(ObjectKind::parse_key("entity/"), None);
    }

    #[test]
    fn test_manifest_counts() {
        let manifest = Manifest::from_mementos(&[
            sample(),
            ObjectMemento::new(ObjectKind::Location, "loc-1", "x.Localhost"),
        ]);
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.count_by_kind()[&ObjectKind::Location], 1);
        assert!(manifest.contains("app-1"));
    }
}
