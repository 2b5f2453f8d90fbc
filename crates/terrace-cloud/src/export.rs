//! Export table
//!
//! Externally visible values of a stack, resolved only after the run reaches
//! a terminal state (see [`DependencyGraph::export`]).
//!
//! [`DependencyGraph::export`]: crate::graph::DependencyGraph::export

use crate::error::{CloudError, Result};
use crate::value::{Input, REDACTED};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single named export
#[derive(Debug, Clone)]
pub struct ExportEntry {
    pub name: String,
    pub input: Input,
    /// Masked when printed
    pub secret: bool,
}

/// Named exports in declaration order
#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    entries: Vec<ExportEntry>,
}

impl ExportTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, input: impl Into<Input>) -> Result<()> {
        self.push(name.into(), input.into(), false)
    }

    pub fn insert_secret(&mut self, name: impl Into<String>, input: impl Into<Input>) -> Result<()> {
        self.push(name.into(), input.into(), true)
    }

    fn push(&mut self, name: String, input: Input, secret: bool) -> Result<()> {
        if self.entries.iter().any(|e| e.name == name) {
            return Err(CloudError::DuplicateExport(name));
        }
        // 秘密値を含む入力は自動的にシークレット扱い
        let secret = secret || input.contains_secret();
        self.entries.push(ExportEntry {
            name,
            input,
            secret,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ExportEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn is_secret(&self, name: &str) -> bool {
        self.get(name).is_some_and(|e| e.secret)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExportEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of `values` with secret exports masked
    pub fn redact(&self, values: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        values
            .iter()
            .map(|(name, value)| {
                let shown = if self.is_secret(name) {
                    Value::String(REDACTED.to_string())
                } else {
                    value.clone()
                };
                (name.clone(), shown)
            })
            .collect()
    }
}
