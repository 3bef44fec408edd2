//! Schema registry: versioned shapes of change snapshots.
//!
//! A schema is pure data. Plugins declare the schemas they emit, and stores
//! validate snapshots against them before appending. Keys unknown to the
//! running registry are passed through untouched so that history produced by
//! plugins that are not loaded survives a round trip.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ValidationError};
use crate::types::SchemaKey;

/// The JSON kind a property must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// An object whose values are all strings.
    StringMap,
    /// An array whose items are all strings.
    StringArray,
    Any,
}

impl PropertyKind {
    fn accepts(self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            PropertyKind::String => value.is_string(),
            PropertyKind::Integer => value.is_i64() || value.is_u64(),
            PropertyKind::Number => value.is_number(),
            PropertyKind::Boolean => value.is_boolean(),
            PropertyKind::Array => value.is_array(),
            PropertyKind::Object => value.is_object(),
            PropertyKind::StringMap => match value {
                Value::Object(map) => map.values().all(Value::is_string),
                _ => false,
            },
            PropertyKind::StringArray => match value {
                Value::Array(items) => items.iter().all(Value::is_string),
                _ => false,
            },
            PropertyKind::Any => true,
        }
    }
}

/// A single property of a snapshot object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub kind: PropertyKind,
    pub required: bool,
}

impl PropertyDef {
    pub fn required(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// The shape of one versioned snapshot type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub key: SchemaKey,
    pub properties: Vec<PropertyDef>,
    /// Whether properties not listed above are allowed.
    pub additional_properties: bool,
}

impl SchemaDefinition {
    /// A closed object schema.
    pub fn new(key: SchemaKey, properties: Vec<PropertyDef>) -> Self {
        Self {
            key,
            properties,
            additional_properties: false,
        }
    }

    /// Allow properties not declared in `properties`.
    pub fn open(mut self) -> Self {
        self.additional_properties = true;
        self
    }

    /// Validate a snapshot against this definition.
    pub fn validate(&self, snapshot: &serde_json::Value) -> Result<(), ValidationError> {
        let violation = |reason: String| ValidationError::violation(self.key.as_str(), reason);

        let object = snapshot
            .as_object()
            .ok_or_else(|| violation("snapshot must be an object".into()))?;

        for prop in &self.properties {
            match object.get(&prop.name) {
                Some(value) if !prop.kind.accepts(value) => {
                    return Err(violation(format!(
                        "property {:?} must be {:?}",
                        prop.name, prop.kind
                    )));
                }
                None if prop.required => {
                    return Err(violation(format!("missing property {:?}", prop.name)));
                }
                _ => {}
            }
        }

        if !self.additional_properties {
            if let Some(extra) = object
                .keys()
                .find(|k| !self.properties.iter().any(|p| &p.name == *k))
            {
                return Err(violation(format!("unexpected property {:?}", extra)));
            }
        }

        Ok(())
    }
}

/// Outcome of validating a snapshot against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaCheck {
    /// The schema is registered and the snapshot matches it.
    Valid,
    /// The key is well-formed but not registered; the change is opaque.
    Unknown,
}

/// Registered schemas, keyed by schema key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    schemas: BTreeMap<SchemaKey, SchemaDefinition>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema.
    ///
    /// Registering an identical definition twice is a no-op; a different
    /// definition under an existing key is rejected.
    pub fn register(&mut self, schema: SchemaDefinition) -> Result<(), CoreError> {
        if let Some(existing) = self.schemas.get(&schema.key) {
            if existing == &schema {
                return Ok(());
            }
            return Err(CoreError::DuplicateSchema(schema.key));
        }
        self.schemas.insert(schema.key.clone(), schema);
        Ok(())
    }

    /// Build a registry from a list of definitions.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = SchemaDefinition>,
    ) -> Result<Self, CoreError> {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    /// Combine two registries into a new one.
    pub fn merged(&self, other: &SchemaRegistry) -> Result<SchemaRegistry, CoreError> {
        let mut merged = self.clone();
        for definition in other.schemas.values() {
            merged.register(definition.clone())?;
        }
        Ok(merged)
    }

    /// Look up a schema.
    pub fn get(&self, key: &SchemaKey) -> Option<&SchemaDefinition> {
        self.schemas.get(key)
    }

    /// Check if a schema is registered.
    pub fn contains(&self, key: &SchemaKey) -> bool {
        self.schemas.contains_key(key)
    }

    /// Registered keys, ascending.
    pub fn keys(&self) -> impl Iterator<Item = &SchemaKey> {
        self.schemas.keys()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Validate a (possibly deleted) snapshot declared under `key`.
    pub fn validate(
        &self,
        key: &SchemaKey,
        snapshot: Option<&serde_json::Value>,
    ) -> Result<SchemaCheck, ValidationError> {
        if !key.is_well_formed() {
            return Err(ValidationError::violation(
                key.as_str(),
                "malformed schema key",
            ));
        }

        let Some(definition) = self.schemas.get(key) else {
            return Ok(SchemaCheck::Unknown);
        };

        if let Some(snapshot) = snapshot {
            definition.validate(snapshot)?;
        }
        Ok(SchemaCheck::Valid)
    }
}
