//! Resource graph error types

use thiserror::Error;

/// Resource graph errors
///
/// Construction errors (`DuplicateId`, `UnknownReference`, `CyclicDependency`)
/// abort before anything is realized. `Provider` and `Timeout` are scoped to a
/// single node and poison only its dependents.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Duplicate resource id: {0}")]
    DuplicateId(String),

    #[error("Duplicate export name: {0}")]
    DuplicateExport(String),

    #[error("Resource '{node}' references unknown resource '{reference}'")]
    UnknownReference { node: String, reference: String },

    #[error("Cyclic dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Output '{attribute}' of '{producer}' was read before '{producer}' was realized")]
    PrematureResolution { producer: String, attribute: String },

    #[error("Resource '{producer}' has no output '{attribute}'")]
    MissingOutput { producer: String, attribute: String },

    #[error("Export '{name}' is unresolved: '{producer}' was not realized")]
    UnresolvedExport { name: String, producer: String },

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Errors raised while building the graph, before any realization
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            CloudError::DuplicateId(_)
                | CloudError::DuplicateExport(_)
                | CloudError::UnknownReference { .. }
                | CloudError::CyclicDependency(_)
        )
    }

    /// Failures reported by (or on behalf of) a provider adapter call
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            CloudError::Provider(_) | CloudError::Timeout(_) | CloudError::ProviderNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
