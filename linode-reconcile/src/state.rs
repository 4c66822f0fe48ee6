//! Desired and observed resource state.
//!
//! `DesiredState` is built once per invocation and never mutated afterwards.
//! `RemoteResource` is a snapshot of what the API returned; it is refreshed
//! explicitly by the reconciler and never cached across invocations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::kind::ResourceKind;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<Value>),
}

/// Attribute name -> value. Desired attributes may be sparse.
pub type Attributes = BTreeMap<String, Value>;

impl Value {
    /// Convert a JSON value returned by the API.
    ///
    /// Returns `None` for `null`, objects, non-integer numbers and lists that
    /// contain any of those; such fields are only kept in the raw snapshot.
    pub fn from_json(json: &serde_json::Value) -> Option<Value> {
        match json {
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(Value::Int),
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            serde_json::Value::Null | serde_json::Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

/// Serialize attributes as a JSON object for request bodies.
pub fn attributes_to_json(attributes: &Attributes) -> serde_json::Value {
    serde_json::Value::Object(
        attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// Whether the resource should exist after reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    Present,
    Absent,
}

/// How long and for what to wait after a resource is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitPolicy {
    pub target_statuses: BTreeSet<String>,
    pub interval: Duration,
    pub timeout: Duration,
}

impl WaitPolicy {
    pub fn new<I, S>(targets: I, interval: Duration, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target_statuses: targets.into_iter().map(Into::into).collect(),
            interval,
            timeout,
        }
    }
}

/// The declared state of one resource.
#[derive(Debug, Clone)]
pub struct DesiredState {
    pub kind: &'static str,
    pub identity_keys: Vec<String>,
    pub existence: Existence,
    pub attributes: Attributes,
    pub mutable_attributes: BTreeSet<String>,
    pub wait: Option<WaitPolicy>,
    /// Delete an existing resource and create it again.
    pub recreate: bool,
}

impl DesiredState {
    /// Start from the defaults declared by a resource kind.
    pub fn new(kind: &ResourceKind, existence: Existence) -> Self {
        Self {
            kind: kind.name,
            identity_keys: kind.identity_keys.iter().map(|k| k.to_string()).collect(),
            existence,
            attributes: Attributes::new(),
            mutable_attributes: kind.mutable.iter().map(|k| k.to_string()).collect(),
            wait: None,
            recreate: false,
        }
    }

    /// Set an attribute. `None` leaves the attribute unset.
    pub fn with<V: Into<Value>>(mut self, key: &str, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.attributes.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn attr<V: Into<Value>>(self, key: &str, value: V) -> Self {
        self.with(key, Some(value))
    }

    pub fn with_wait(mut self, wait: Option<WaitPolicy>) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_recreate(mut self, recreate: bool) -> Self {
        self.recreate = recreate;
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Identity key values present in the attributes, used as lookup criteria.
    pub fn identity_criteria(&self) -> Attributes {
        self.identity_keys
            .iter()
            .filter_map(|k| self.attributes.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Human-readable identity for action entries and error messages.
    pub fn identity(&self) -> String {
        let parts: Vec<String> = self
            .identity_keys
            .iter()
            .filter_map(|k| self.attributes.get(k).map(ToString::to_string))
            .collect();
        if parts.is_empty() {
            "<unidentified>".to_string()
        } else {
            parts.join("/")
        }
    }
}

/// A snapshot of a resource as returned by the API.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResource {
    pub kind: &'static str,
    pub id: String,
    pub attributes: Attributes,
    raw: serde_json::Value,
}

impl RemoteResource {
    pub fn from_json(kind: &'static str, raw: serde_json::Value) -> Result<Self, ClientError> {
        let object = raw
            .as_object()
            .ok_or_else(|| ClientError::Decode(format!("{} is not a JSON object", kind)))?;

        let id = match object.get("id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return Err(ClientError::Decode(format!("{} has no id", kind))),
        };

        let attributes = object
            .iter()
            .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
            .collect();

        Ok(Self {
            kind,
            id,
            attributes,
            raw,
        })
    }

    /// Resource-kind-specific status, if the resource reports one.
    pub fn status(&self) -> Option<&str> {
        self.attributes.get("status").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }

    pub fn into_raw(self) -> serde_json::Value {
        self.raw
    }

    /// Apply fields accepted by a successful update call.
    pub fn apply(&mut self, changes: &Attributes) {
        for (key, value) in changes {
            self.attributes.insert(key.clone(), value.clone());
            if let Some(object) = self.raw.as_object_mut() {
                object.insert(key.clone(), value.to_json());
            }
        }
    }
}

/// Ordered record of side effects performed during one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionLog {
    actions: Vec<String>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, description: impl Into<String>) {
        self.actions.push(description.into());
    }

    /// True iff at least one action was registered.
    pub fn changed(&self) -> bool {
        !self.actions.is_empty()
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Serialize for ActionLog {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("ActionLog", 2)?;
        s.serialize_field("changed", &self.changed())?;
        s.serialize_field("actions", &self.actions)?;
        s.end()
    }
}
