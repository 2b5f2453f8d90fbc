//! Destroying persisted resources
//!
//! Resources are deleted in reverse dependency order. A resource is only
//! deleted once nothing left in the state depends on it, so a failed delete
//! keeps everything it was realized after alive.

use crate::action::ApplyResult;
use crate::error::CloudError;
use crate::graph::DependencyGraph;
use crate::provider::ProviderAdapter;
use crate::resolver::RunOptions;
use crate::state::{ResourceState, StackState};
use std::time::Instant;

/// Destroy every stored resource selected by `filter`
///
/// Destroyed resources are removed from `state`; failed and blocked ones stay.
pub async fn destroy<F>(
    state: &mut StackState,
    provider: &dyn ProviderAdapter,
    options: &RunOptions,
    filter: F,
) -> ApplyResult
where
    F: Fn(&ResourceState) -> bool,
{
    let started = Instant::now();
    let mut result = ApplyResult::new();

    let mut targets: Vec<String> = state
        .creation_order()
        .into_iter()
        .filter(|id| state.get_resource(id).is_some_and(&filter))
        .map(str::to_string)
        .collect();
    targets.reverse();

    for id in targets {
        let Some(entry) = state.get_resource(&id) else {
            continue;
        };

        if let Some(dependent) = state
            .resources
            .values()
            .find(|r| r.dependencies.iter().any(|d| d == &id))
        {
            tracing::warn!(id = %id, dependent = %dependent.id, "Destroy blocked");
            result.add_failure(id.clone(), format!("still required by '{}'", dependent.id));
            continue;
        }

        tracing::info!(id = %id, kind = %entry.kind, "Destroying");
        let call = provider.destroy(&entry.kind, &id, &entry.outputs);
        let outcome = match tokio::time::timeout(options.timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CloudError::Timeout(format!(
                "destroying '{id}' did not finish within {}s",
                options.timeout.as_secs_f64()
            ))),
        };

        match outcome {
            Ok(()) => {
                state.remove_resource(&id);
                result.add_success(id.clone(), format!("destroyed '{id}'"));
            }
            Err(e) => {
                tracing::error!(id = %id, "Destroy failed: {}", e);
                result.add_failure(id, e.to_string());
            }
        }
    }

    result.duration_ms = started.elapsed().as_millis() as u64;
    result
}

/// Destroy stored resources that are no longer declared in `graph`
pub async fn prune(
    graph: &DependencyGraph,
    state: &mut StackState,
    provider: &dyn ProviderAdapter,
    options: &RunOptions,
) -> ApplyResult {
    destroy(state, provider, options, |r| !graph.contains(&r.id)).await
}
