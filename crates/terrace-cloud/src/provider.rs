//! Provider adapter trait definition

use crate::error::{CloudError, Result};
use crate::value::Properties;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cloud provider adapter
///
/// The engine never validates provider-specific schemas: inputs are passed
/// through opaquely and the adapter answers with the output attributes of the
/// realized object. Adapters receive their configuration explicitly in their
/// constructor rather than reading process-global state.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Returns the provider name (e.g., "mock", "process")
    fn name(&self) -> &str;

    /// Create or update the object `id` of type `kind`
    async fn realize(&self, kind: &str, id: &str, inputs: &Properties) -> Result<Properties>;

    /// Call a read-only data source function
    async fn invoke(&self, function: &str, id: &str, _inputs: &Properties) -> Result<Properties> {
        Err(CloudError::Provider(format!(
            "{} does not support invoke ({function} for '{id}')",
            self.name()
        )))
    }

    /// Delete a previously realized object
    async fn destroy(&self, _kind: &str, _id: &str, _outputs: &Properties) -> Result<()> {
        Ok(())
    }

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::ok(self.name()))
    }
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Routes each kind to an adapter by its prefix
///
/// `azure:network:VirtualNetwork` is handled by the adapter registered as
/// `azure`. A kind without `:` is its own prefix.
#[derive(Default)]
pub struct ProviderRouter {
    providers: BTreeMap<String, Box<dyn ProviderAdapter>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, prefix: impl Into<String>, adapter: Box<dyn ProviderAdapter>) {
        self.providers.insert(prefix.into(), adapter);
    }

    pub fn with(mut self, prefix: impl Into<String>, adapter: Box<dyn ProviderAdapter>) -> Self {
        self.register(prefix, adapter);
        self
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Adapter responsible for `kind`
    pub fn route(&self, kind: &str) -> Result<&dyn ProviderAdapter> {
        let prefix = kind.split(':').next().unwrap_or(kind);
        self.providers
            .get(prefix)
            .map(|p| p.as_ref())
            .ok_or_else(|| CloudError::ProviderNotFound(prefix.to_string()))
    }
}

#[async_trait]
impl ProviderAdapter for ProviderRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn realize(&self, kind: &str, id: &str, inputs: &Properties) -> Result<Properties> {
        self.route(kind)?.realize(kind, id, inputs).await
    }

    async fn invoke(&self, function: &str, id: &str, inputs: &Properties) -> Result<Properties> {
        self.route(function)?.invoke(function, id, inputs).await
    }

    async fn destroy(&self, kind: &str, id: &str, outputs: &Properties) -> Result<()> {
        self.route(kind)?.destroy(kind, id, outputs).await
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        for (prefix, provider) in &self.providers {
            let status = provider.check_auth().await?;
            if !status.authenticated {
                let reason = status.error.unwrap_or_else(|| "unknown".to_string());
                return Ok(AuthStatus::failed(format!("{prefix}: {reason}")));
            }
        }
        Ok(AuthStatus::ok(self.prefixes().collect::<Vec<_>>().join(", ")))
    }
}
