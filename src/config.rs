//! Configuration payload handed to stores by the engine.
//!
//! The engine parses its configuration files; stores only see a [`ConfigNode`]:
//! a JSON value plus the key it was found under, used to name the offending
//! node in loading errors.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

/// A node of the engine's configuration tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigNode {
    key: String,
    value: Value,
}

impl ConfigNode {
    /// An empty node under `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Value::Null,
        }
    }

    pub fn from_value(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Key this node is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Raw JSON payload.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consume the node, returning its payload.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// True for a null payload or an empty object.
    pub fn is_empty(&self) -> bool {
        match &self.value {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Deserialize this node into `T`.
    ///
    /// An empty node deserializes like an empty object so that configs made
    /// of defaulted fields load from nothing.
    pub fn get<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.value {
            Value::Null => serde_json::from_value(Value::Object(Map::new())),
            value => T::deserialize(value),
        }
    }

    /// Replace this node's value with `value`, keeping existing fields
    /// `value` does not define.
    pub fn set<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        let new = serde_json::to_value(value)?;
        match (&mut self.value, new) {
            (Value::Object(existing), Value::Object(fields)) => existing.extend(fields),
            (slot, new) => *slot = new,
        }
        Ok(())
    }

    /// Child node `name`; empty when absent.
    pub fn child(&self, name: &str) -> ConfigNode {
        let value = self.value.get(name).cloned().unwrap_or(Value::Null);
        ConfigNode::from_value(format!("{}.{}", self.key, name), value)
    }

    /// Set field `name`, turning a non-object payload into an object.
    pub fn set_child(&mut self, name: &str, value: Value) {
        if !self.value.is_object() {
            self.value = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.value {
            map.insert(name.to_string(), value);
        }
    }

    /// String field `name`, if present.
    pub fn string(&self, name: &str) -> Option<&str> {
        self.value.get(name).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        path: String,
        retries: u32,
    }

    #[test]
    fn test_empty_node_uses_defaults() {
        let node = ConfigNode::new("backends.main");
        assert!(node.is_empty());
        assert_eq!(node.get::<Sample>().unwrap(), Sample::default());
    }

    #[test]
    fn test_get_and_set() {
        let mut node = ConfigNode::from_value("main", json!({"type": "sqlite"}));
        node.set(&Sample {
            path: "perms.db".to_string(),
            retries: 2,
        })
        .unwrap();

        assert_eq!(node.string("type"), Some("sqlite"));
        assert_eq!(node.get::<Sample>().unwrap().path, "perms.db");
    }

    #[test]
    fn test_child_key_path() {
        let node = ConfigNode::from_value("backends", json!({"main": {"retries": 4}}));
        let child = node.child("main");
        assert_eq!(child.key(), "backends.main");
        assert_eq!(child.get::<Sample>().unwrap().retries, 4);
        assert!(node.child("missing").is_empty());
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let node = ConfigNode::from_value("main", json!({"retries": "many"}));
        assert!(node.get::<Sample>().is_err());
    }
}
