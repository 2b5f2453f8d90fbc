//! In-memory provider adapter
//!
//! Deterministic stand-in for a real cloud: each realized object echoes its
//! inputs as outputs and gains an `id` of `<id>_id`. Failures and latency can
//! be scripted per node, and every call is logged, which makes it the adapter
//! of choice for tests and dry runs.

use crate::error::{CloudError, Result};
use crate::provider::ProviderAdapter;
use crate::value::Properties;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Kind of call received by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOperation {
    Realize,
    Invoke,
    Destroy,
}

/// A recorded call
#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: MockOperation,
    pub kind: String,
    pub id: String,
    pub inputs: Properties,
}

/// In-memory provider adapter
pub struct MockProvider {
    name: String,
    outputs: HashMap<String, Properties>,
    failures: HashMap<String, String>,
    destroy_failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outputs: HashMap::new(),
            failures: HashMap::new(),
            destroy_failures: HashMap::new(),
            delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Extra outputs returned for `id` (object fields override the echoed inputs)
    pub fn with_outputs(mut self, id: impl Into<String>, outputs: Value) -> Self {
        if let Value::Object(map) = outputs {
            self.outputs.insert(id.into(), map);
        }
        self
    }

    /// Make realizing (or invoking) `id` fail with `message`
    pub fn fail_on(mut self, id: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.insert(id.into(), message.into());
        self
    }

    /// Make destroying `id` fail with `message`
    pub fn fail_destroy(mut self, id: impl Into<String>, message: impl Into<String>) -> Self {
        self.destroy_failures.insert(id.into(), message.into());
        self
    }

    /// Sleep before answering for `id`
    pub fn delay(mut self, id: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(id.into(), delay);
        self
    }

    /// Every call received so far, in arrival order
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ids passed to `operation`, in arrival order
    pub fn ids(&self, operation: MockOperation) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation == operation)
            .map(|c| c.id)
            .collect()
    }

    pub fn realize_count(&self) -> usize {
        self.ids(MockOperation::Realize).len()
    }

    fn record(&self, operation: MockOperation, kind: &str, id: &str, inputs: &Properties) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockCall {
                operation,
                kind: kind.to_string(),
                id: id.to_string(),
                inputs: inputs.clone(),
            });
    }

    async fn answer(&self, id: &str, inputs: &Properties) -> Result<Properties> {
        if let Some(delay) = self.delays.get(id) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(message) = self.failures.get(id) {
            return Err(CloudError::Provider(message.clone()));
        }

        let mut outputs = inputs.clone();
        outputs
            .entry("id")
            .or_insert_with(|| Value::String(format!("{id}_id")));
        outputs
            .entry("name")
            .or_insert_with(|| Value::String(id.to_string()));
        if let Some(extra) = self.outputs.get(id) {
            outputs.extend(extra.clone());
        }
        Ok(outputs)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn realize(&self, kind: &str, id: &str, inputs: &Properties) -> Result<Properties> {
        self.record(MockOperation::Realize, kind, id, inputs);
        tracing::debug!(kind, id, "Mock realize");
        self.answer(id, inputs).await
    }

    async fn invoke(&self, function: &str, id: &str, inputs: &Properties) -> Result<Properties> {
        self.record(MockOperation::Invoke, function, id, inputs);
        self.answer(id, inputs).await
    }

    async fn destroy(&self, kind: &str, id: &str, outputs: &Properties) -> Result<()> {
        self.record(MockOperation::Destroy, kind, id, outputs);
        match self.destroy_failures.get(id) {
            Some(message) => Err(CloudError::Provider(message.clone())),
            None => Ok(()),
        }
    }
}
