//! Build properties: named values tagged with the source that set them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single property value and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub value: Value,
    pub source: String,
}

/// An ordered collection of properties.
///
/// Later updates win; `update` is used to layer scheduler defaults, caller
/// supplied values, and scheduler-identifying properties on top of each other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, Property>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_property(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
        source: impl Into<String>,
    ) {
        self.0.insert(
            name.into(),
            Property {
                value: value.into(),
                source: source.into(),
            },
        );
    }

    /// Builder-style variant of [`Properties::set_property`].
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
        source: impl Into<String>,
    ) -> Self {
        self.set_property(name, value, source);
        self
    }

    pub fn get_property(&self, name: &str) -> Option<&Value> {
        self.0.get(name).map(|p| &p.value)
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.0.get(name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Overlay `other` on top of `self`.
    pub fn update(&mut self, other: &Properties) {
        for (name, prop) in &other.0 {
            self.0.insert(name.clone(), prop.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}
