//! Input values of resource nodes
//!
//! An [`Input`] is either known at declaration time (a literal), or a
//! [`Deferred`] that becomes known once its producer is realized. Lists and
//! maps may mix both.

use crate::deferred::{Deferred, OutputSource};
use crate::error::Result;
use crate::registry::NodeRef;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Property bag passed to and returned from provider adapters
pub type Properties = serde_json::Map<String, Value>;

/// Rendered in place of secret values
pub const REDACTED: &str = "[secret]";

/// A single input property
#[derive(Clone)]
pub enum Input {
    Literal(Value),
    /// A literal that must never be printed or persisted in plain text
    Secret(Value),
    Deferred(Deferred),
    List(Vec<Input>),
    Map(BTreeMap<String, Input>),
}

impl Input {
    pub fn literal(value: impl Into<Value>) -> Self {
        Input::Literal(value.into())
    }

    pub fn secret(value: impl Into<Value>) -> Self {
        Input::Secret(value.into())
    }

    /// Nodes whose outputs this input reads, in first-seen order
    pub fn producers(&self) -> Vec<NodeRef> {
        let mut producers = Vec::new();
        self.collect_producers(&mut producers);
        producers
    }

    fn collect_producers(&self, out: &mut Vec<NodeRef>) {
        match self {
            Input::Literal(_) | Input::Secret(_) => {}
            Input::Deferred(deferred) => {
                for producer in deferred.producers() {
                    if !out.contains(&producer) {
                        out.push(producer);
                    }
                }
            }
            Input::List(items) => items.iter().for_each(|i| i.collect_producers(out)),
            Input::Map(entries) => entries.values().for_each(|i| i.collect_producers(out)),
        }
    }

    pub fn is_known(&self) -> bool {
        match self {
            Input::Literal(_) | Input::Secret(_) => true,
            Input::Deferred(_) => false,
            Input::List(items) => items.iter().all(Input::is_known),
            Input::Map(entries) => entries.values().all(Input::is_known),
        }
    }

    pub fn contains_secret(&self) -> bool {
        match self {
            Input::Secret(_) => true,
            Input::Literal(_) => false,
            Input::Deferred(deferred) => deferred.is_secret(),
            Input::List(items) => items.iter().any(Input::contains_secret),
            Input::Map(entries) => entries.values().any(Input::contains_secret),
        }
    }

    /// Substitute resolved values; caches every deferred value it touches
    pub fn resolve(&self, source: &dyn OutputSource) -> Result<Value> {
        self.substitute(source, true)
    }

    /// Like [`Input::resolve`] but leaves deferred caches untouched
    pub fn evaluate(&self, source: &dyn OutputSource) -> Result<Value> {
        self.substitute(source, false)
    }

    fn substitute(&self, source: &dyn OutputSource, cache: bool) -> Result<Value> {
        Ok(match self {
            Input::Literal(value) | Input::Secret(value) => value.clone(),
            Input::Deferred(deferred) if cache => deferred.resolve(source)?,
            Input::Deferred(deferred) => deferred.evaluate(source)?,
            Input::List(items) => Value::Array(
                items
                    .iter()
                    .map(|i| i.substitute(source, cache))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Input::Map(entries) => {
                let mut map = Properties::new();
                for (key, input) in entries {
                    map.insert(key.clone(), input.substitute(source, cache)?);
                }
                Value::Object(map)
            }
        })
    }

    /// Display form with secrets masked and deferred values marked unknown
    pub fn redacted(&self) -> Value {
        match self {
            Input::Literal(value) => value.clone(),
            Input::Secret(_) => Value::String(REDACTED.to_string()),
            Input::Deferred(deferred) => Value::String(format!("<{deferred}>")),
            Input::List(items) => Value::Array(items.iter().map(Input::redacted).collect()),
            Input::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.redacted()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Input::Secret(_) => f.debug_tuple("Secret").field(&REDACTED).finish(),
            Input::Deferred(deferred) => f.debug_tuple("Deferred").field(deferred).finish(),
            Input::List(items) => f.debug_tuple("List").field(items).finish(),
            Input::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
        }
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Literal(value)
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Input::Literal(Value::String(value.to_string()))
    }
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Input::Literal(Value::String(value))
    }
}

impl From<i64> for Input {
    fn from(value: i64) -> Self {
        Input::Literal(Value::from(value))
    }
}

impl From<i32> for Input {
    fn from(value: i32) -> Self {
        Input::Literal(Value::from(value))
    }
}

impl From<u64> for Input {
    fn from(value: u64) -> Self {
        Input::Literal(Value::from(value))
    }
}

impl From<f64> for Input {
    fn from(value: f64) -> Self {
        Input::Literal(Value::from(value))
    }
}

impl From<bool> for Input {
    fn from(value: bool) -> Self {
        Input::Literal(Value::Bool(value))
    }
}

impl From<Deferred> for Input {
    fn from(value: Deferred) -> Self {
        Input::Deferred(value)
    }
}

impl From<&Deferred> for Input {
    fn from(value: &Deferred) -> Self {
        Input::Deferred(value.clone())
    }
}

impl<T: Into<Input>> From<Vec<T>> for Input {
    fn from(items: Vec<T>) -> Self {
        Input::List(items.into_iter().map(Into::into).collect())
    }
}

/// Named input properties of a node
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    entries: BTreeMap<String, Input>,
}

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, input: impl Into<Input>) -> Self {
        self.insert(name, input);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, input: impl Into<Input>) -> Option<Input> {
        self.entries.insert(name.into(), input.into())
    }

    pub fn get(&self, name: &str) -> Option<&Input> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Input)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn producers(&self) -> Vec<NodeRef> {
        let mut producers: Vec<NodeRef> = Vec::new();
        for input in self.entries.values() {
            for producer in input.producers() {
                if !producers.contains(&producer) {
                    producers.push(producer);
                }
            }
        }
        producers
    }

    pub fn contains_secret(&self) -> bool {
        self.entries.values().any(Input::contains_secret)
    }

    pub fn resolve(&self, source: &dyn OutputSource) -> Result<Properties> {
        self.entries
            .iter()
            .map(|(k, v)| Ok((k.clone(), v.resolve(source)?)))
            .collect()
    }

    pub fn evaluate(&self, source: &dyn OutputSource) -> Result<Properties> {
        self.entries
            .iter()
            .map(|(k, v)| Ok((k.clone(), v.evaluate(source)?)))
            .collect()
    }

    pub fn redacted(&self) -> Properties {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.redacted()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<Input>> FromIterator<(K, V)> for Inputs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
