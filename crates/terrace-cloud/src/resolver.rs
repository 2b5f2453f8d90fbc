//! Dependency graph resolver
//!
//! Walks a [`DependencyGraph`] in topological order and realizes every node
//! against a [`ProviderAdapter`]. Independent nodes are realized concurrently,
//! bounded by [`RunOptions::parallelism`]. A node is started only once all of
//! its dependencies are `Realized`; its deferred inputs are substituted right
//! before the provider call.
//!
//! A failed node never aborts the run: its transitive dependents are marked
//! `Skipped` and every independent branch continues. Nothing is rolled back.
//!
//! Node state and outputs are written only by the scheduling loop, when a
//! realization completes, so provider calls never observe a half-updated
//! graph.

use crate::error::{CloudError, Result};
use crate::export::ExportTable;
use crate::graph::{DependencyGraph, NodeState};
use crate::provider::ProviderAdapter;
use crate::registry::NodeRole;
use crate::report::{NodeOutcome, NodeReport, RunReport};
use crate::state::StackState;
use crate::value::Properties;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Default upper bound on concurrent provider calls
pub const DEFAULT_PARALLELISM: usize = 4;

/// Default per-call timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Resolver options
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum number of provider calls in flight
    pub parallelism: usize,

    /// Timeout of a single provider call
    pub timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RunOptions {
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Cooperative cancellation signal shared with a running resolver
///
/// Cancelling stops the scheduling of new realizations. Calls already in
/// flight are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A finished provider call
struct Completion {
    node: usize,
    inputs: Properties,
    result: Result<Properties>,
}

/// Realizes a dependency graph against a provider
pub struct Resolver<'a> {
    provider: &'a dyn ProviderAdapter,
    options: RunOptions,
    cancel: CancelToken,
    state: Option<&'a mut StackState>,
}

impl<'a> Resolver<'a> {
    pub fn new(provider: &'a dyn ProviderAdapter) -> Self {
        Self {
            provider,
            options: RunOptions::default(),
            cancel: CancelToken::new(),
            state: None,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Record realizations into `state` and restore unchanged resources from it
    pub fn with_state(mut self, state: &'a mut StackState) -> Self {
        self.state = Some(state);
        self
    }

    /// Realize every node of `graph` that is not realized yet
    ///
    /// Nodes left `Failed` or `Skipped` by an earlier run on the same graph
    /// are retried.
    pub async fn run(&mut self, graph: &mut DependencyGraph) -> RunReport {
        let started = Instant::now();
        let count = graph.len();
        let parallelism = self.options.parallelism.max(1);

        let mut position = vec![0; count];
        for (pos, &node) in graph.order_indices().iter().enumerate() {
            position[node] = pos;
        }

        let mut outcomes: Vec<Option<NodeOutcome>> = vec![None; count];
        for node in 0..count {
            match graph.state_at(node) {
                NodeState::Realized => outcomes[node] = Some(NodeOutcome::Unchanged),
                NodeState::Pending => {}
                _ => graph.set_state(node, NodeState::Pending),
            }
        }

        let mut ready: BinaryHeap<Reverse<(usize, usize)>> = (0..count)
            .filter(|&n| *graph.state_at(n) == NodeState::Pending && graph.is_ready(n))
            .map(|n| Reverse((position[n], n)))
            .collect();

        let provider = self.provider;
        let limit = self.options.timeout;
        let mut in_flight = FuturesUnordered::new();
        let mut cancelled = false;

        tracing::info!(nodes = count, parallelism, "Starting run");

        loop {
            if !cancelled && self.cancel.is_cancelled() {
                tracing::warn!("Run cancelled, no further nodes will be started");
                cancelled = true;
            }

            while !cancelled && in_flight.len() < parallelism {
                let Some(Reverse((_, node))) = ready.pop() else {
                    break;
                };

                let decl = graph.decl(node);
                let (id, kind, role) = (decl.id.clone(), decl.kind.clone(), decl.role);
                let inputs = match decl.inputs.resolve(&*graph) {
                    Ok(inputs) => inputs,
                    Err(e) => {
                        tracing::error!(id = %id, "Cannot resolve inputs: {}", e);
                        fail(graph, &mut outcomes, node, e.to_string());
                        continue;
                    }
                };

                if role == NodeRole::Resource
                    && let Some(outputs) = self.restorable(&id, &kind, &inputs)
                {
                    tracing::debug!(id = %id, "Restored from state");
                    graph.mark_realized(node, outputs);
                    outcomes[node] = Some(NodeOutcome::Unchanged);
                    push_ready(graph, &position, &mut ready, node);
                    continue;
                }

                tracing::info!(id = %id, kind = %kind, "Realizing");
                graph.set_state(node, NodeState::Realizing);
                in_flight.push(async move {
                    let call = async {
                        match role {
                            NodeRole::Resource => provider.realize(&kind, &id, &inputs).await,
                            NodeRole::Invoke => provider.invoke(&kind, &id, &inputs).await,
                        }
                    };
                    let result = match tokio::time::timeout(limit, call).await {
                        Ok(result) => result,
                        Err(_) => Err(CloudError::Timeout(format!(
                            "'{id}' did not finish within {}s",
                            limit.as_secs_f64()
                        ))),
                    };
                    Completion {
                        node,
                        inputs,
                        result,
                    }
                });
            }

            let Some(done) = in_flight.next().await else {
                break;
            };
            self.complete(graph, &position, &mut ready, &mut outcomes, done);
        }

        let nodes = graph
            .order_indices()
            .iter()
            .map(|&node| {
                let decl = graph.decl(node);
                NodeReport {
                    id: decl.id.clone(),
                    kind: decl.kind.clone(),
                    outcome: outcomes[node].take().unwrap_or(NodeOutcome::NotStarted),
                }
            })
            .collect();

        let report = RunReport {
            nodes,
            duration_ms: started.elapsed().as_millis() as u64,
            cancelled,
        };
        tracing::info!("Run finished: {}", report.summary());
        report
    }

    /// Stored outputs of `id` if it was realized from identical inputs
    fn restorable(&self, id: &str, kind: &str, inputs: &Properties) -> Option<Properties> {
        let entry = self.state.as_deref()?.matching(id, kind, inputs)?;
        Some(entry.outputs.clone())
    }

    fn complete(
        &mut self,
        graph: &mut DependencyGraph,
        position: &[usize],
        ready: &mut BinaryHeap<Reverse<(usize, usize)>>,
        outcomes: &mut [Option<NodeOutcome>],
        done: Completion,
    ) {
        let Completion {
            node,
            inputs,
            result,
        } = done;

        match result {
            Ok(outputs) => {
                let decl = graph.decl(node);
                let outcome = match decl.role {
                    NodeRole::Invoke => NodeOutcome::Read,
                    NodeRole::Resource => {
                        let previous = self
                            .state
                            .as_deref()
                            .is_some_and(|s| s.get_resource(&decl.id).is_some());
                        if previous {
                            NodeOutcome::Updated
                        } else {
                            NodeOutcome::Created
                        }
                    }
                };
                tracing::info!(id = %decl.id, "{}", outcome);

                if decl.role == NodeRole::Resource
                    && let Some(state) = self.state.as_deref_mut()
                {
                    let entry = state
                        .new_resource(&decl.id, &decl.kind, &inputs)
                        .with_outputs(outputs.clone())
                        .with_dependencies(graph.resource_dependencies(node));
                    state.set_resource(entry);
                }

                graph.mark_realized(node, outputs);
                outcomes[node] = Some(outcome);
                push_ready(graph, position, ready, node);
            }
            Err(e) => {
                tracing::error!(id = %graph.decl(node).id, "Realization failed: {}", e);
                fail(graph, outcomes, node, e.to_string());
            }
        }
    }
}

/// Queue the dependents of `node` that just became ready
fn push_ready(
    graph: &DependencyGraph,
    position: &[usize],
    ready: &mut BinaryHeap<Reverse<(usize, usize)>>,
    node: usize,
) {
    for &dependent in graph.dependent_indices(node) {
        if *graph.state_at(dependent) == NodeState::Pending && graph.is_ready(dependent) {
            ready.push(Reverse((position[dependent], dependent)));
        }
    }
}

/// Mark `node` failed and skip everything downstream of it
fn fail(
    graph: &mut DependencyGraph,
    outcomes: &mut [Option<NodeOutcome>],
    node: usize,
    cause: String,
) {
    graph.set_state(node, NodeState::Failed(cause.clone()));
    outcomes[node] = Some(NodeOutcome::Failed(cause));

    let blocked_by = graph.decl(node).id.clone();
    let mut stack = graph.dependent_indices(node).to_vec();
    while let Some(dependent) = stack.pop() {
        if *graph.state_at(dependent) != NodeState::Pending {
            continue;
        }
        tracing::debug!(id = %graph.decl(dependent).id, blocked_by = %blocked_by, "Skipped");
        graph.set_state(
            dependent,
            NodeState::Skipped {
                blocked_by: blocked_by.clone(),
            },
        );
        outcomes[dependent] = Some(NodeOutcome::Skipped {
            blocked_by: blocked_by.clone(),
        });
        stack.extend_from_slice(graph.dependent_indices(dependent));
    }
}

/// Realize `graph` with default options and no persisted state
pub async fn run(graph: &mut DependencyGraph, provider: &dyn ProviderAdapter) -> RunReport {
    Resolver::new(provider).run(graph).await
}

/// Mark realized every resource whose persisted entry still matches its inputs
///
/// No provider is called. Invoke nodes and everything downstream of an
/// unmatched resource stay `Pending`. Returns the number of restored nodes.
pub fn restore(graph: &mut DependencyGraph, state: &StackState) -> usize {
    let mut restored = 0;
    for node in graph.order_indices().to_vec() {
        if *graph.state_at(node) != NodeState::Pending || !graph.is_ready(node) {
            continue;
        }
        let decl = graph.decl(node);
        if decl.role != NodeRole::Resource {
            continue;
        }
        let Ok(inputs) = decl.inputs.resolve(&*graph) else {
            continue;
        };
        if let Some(entry) = state.matching(&decl.id, &decl.kind, &inputs) {
            let outputs = entry.outputs.clone();
            graph.mark_realized(node, outputs);
            restored += 1;
        }
    }
    tracing::debug!(restored, "Restored nodes from state");
    restored
}

/// Resolve the export table of a finished run
pub fn export(graph: &DependencyGraph, table: &ExportTable) -> Result<BTreeMap<String, Value>> {
    graph.export(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;
    use crate::registry::GraphBuilder;
    use crate::value::Inputs;

    #[test]
    fn test_default_options() {
        let options = RunOptions::default();
        assert_eq!(options.parallelism, 4);
        assert_eq!(options.timeout, Duration::from_secs(1800));
        assert_eq!(RunOptions::default().with_parallelism(0).parallelism, 1);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_empty_graph() {
        let mut graph = GraphBuilder::new().finalize().unwrap();
        let report = run(&mut graph, &MockProvider::new()).await;
        assert!(report.is_success());
        assert!(report.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_restore_without_provider_calls() {
        let build = || {
            let mut builder = GraphBuilder::new();
            let net = builder
                .declare("test:net", "net", Inputs::new().with("cidr", "10.0.0.0/16"))
                .unwrap();
            builder
                .declare("test:vm", "vm", Inputs::new().with("net", net.output("id")))
                .unwrap();
            builder.finalize().unwrap()
        };

        let mut state = StackState::new();
        let mut first = build();
        let report = Resolver::new(&MockProvider::new())
            .with_state(&mut state)
            .run(&mut first)
            .await;
        assert!(report.is_success());

        let mut second = build();
        assert_eq!(restore(&mut second, &state), 2);
        assert!(second.is_complete());
        assert_eq!(second.outputs_of("vm").unwrap()["net"], "net_id");

        state.remove_resource("net");
        let mut third = build();
        assert_eq!(restore(&mut third, &state), 0);
        assert_eq!(third.state("vm"), Some(&NodeState::Pending));
    }

    #[tokio::test]
    async fn test_failed_node_is_retried_on_next_run() {
        let mut builder = GraphBuilder::new();
        let a = builder.declare("test:a", "a", Inputs::new()).unwrap();
        builder
            .declare("test:b", "b", Inputs::new().with("a", a.output("id")))
            .unwrap();
        let mut graph = builder.finalize().unwrap();

        let failing = MockProvider::new().fail_on("a", "transient");
        let first = run(&mut graph, &failing).await;
        assert_eq!(
            first.outcome("b"),
            Some(&NodeOutcome::Skipped { blocked_by: "a".into() })
        );

        let healthy = MockProvider::new();
        let second = run(&mut graph, &healthy).await;
        assert!(second.is_success());
        assert_eq!(healthy.realize_count(), 2);
    }
}
