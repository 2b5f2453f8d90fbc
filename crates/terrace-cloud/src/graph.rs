//! Finalized dependency graph
//!
//! The graph owns every node declaration, its topological order, and the
//! per-node run state. Declarations are frozen; only state and realized
//! outputs change, and only through the resolver.

use crate::deferred::OutputSource;
use crate::error::{CloudError, Result};
use crate::export::ExportTable;
use crate::registry::{NodeDecl, NodeRef, NodeRole};
use crate::value::Properties;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Run state of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Realizing,
    Realized,
    /// Realization failed; carries the cause
    Failed(String),
    /// Never attempted because an ancestor failed
    Skipped { blocked_by: String },
}

impl NodeState {
    pub fn is_realized(&self) -> bool {
        matches!(self, NodeState::Realized)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Realized | NodeState::Failed(_) | NodeState::Skipped { .. }
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Pending => write!(f, "pending"),
            NodeState::Realizing => write!(f, "realizing"),
            NodeState::Realized => write!(f, "realized"),
            NodeState::Failed(cause) => write!(f, "failed: {cause}"),
            NodeState::Skipped { blocked_by } => write!(f, "skipped (blocked by {blocked_by})"),
        }
    }
}

/// Declared nodes plus the edges implied by their deferred references
#[derive(Debug)]
pub struct DependencyGraph {
    tag: u64,
    nodes: Vec<NodeDecl>,
    index: HashMap<String, usize>,
    order: Vec<usize>,
    dependencies: Vec<BTreeSet<usize>>,
    dependents: Vec<Vec<usize>>,
    states: Vec<NodeState>,
    outputs: Vec<Option<Arc<Properties>>>,
}

impl DependencyGraph {
    pub(crate) fn build(
        tag: u64,
        nodes: Vec<NodeDecl>,
        index: HashMap<String, usize>,
    ) -> Result<Self> {
        let count = nodes.len();
        let dependencies: Vec<BTreeSet<usize>> =
            nodes.iter().map(NodeDecl::dependency_indices).collect();

        let mut dependents = vec![Vec::new(); count];
        for (node, deps) in dependencies.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(node);
            }
        }

        // Kahn's algorithm; the min-heap keeps declaration order among ready nodes
        let mut in_degree: Vec<usize> = dependencies.iter().map(BTreeSet::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| Reverse(node))
            .collect();

        let mut order = Vec::with_capacity(count);
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &dependent in &dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() != count {
            let cycle = find_cycle(&dependencies, &in_degree)
                .into_iter()
                .map(|i| nodes[i].id.clone())
                .collect();
            return Err(CloudError::CyclicDependency(cycle));
        }

        tracing::debug!(nodes = count, "Finalized dependency graph");
        Ok(Self {
            tag,
            nodes,
            index,
            order,
            dependencies,
            dependents,
            states: vec![NodeState::Pending; count],
            outputs: vec![None; count],
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Nodes in topological order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeDecl> {
        self.order.iter().map(|&i| &self.nodes[i])
    }

    /// Node ids in topological order
    pub fn order(&self) -> Vec<&str> {
        self.nodes().map(|n| n.id.as_str()).collect()
    }

    pub fn node(&self, id: &str) -> Option<&NodeDecl> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn state(&self, id: &str) -> Option<&NodeState> {
        self.index.get(id).map(|&i| &self.states[i])
    }

    /// Outputs of a realized node
    pub fn outputs_of(&self, id: &str) -> Option<&Properties> {
        let &i = self.index.get(id)?;
        if self.states[i].is_realized() {
            self.outputs[i].as_deref()
        } else {
            None
        }
    }

    /// Direct dependencies of `id`, in declaration order
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| {
                self.dependencies[i]
                    .iter()
                    .map(|&d| self.nodes[d].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether every node has been realized
    pub fn is_complete(&self) -> bool {
        self.states.iter().all(NodeState::is_realized)
    }

    /// Resolve the export table against realized outputs
    ///
    /// Fails with [`CloudError::UnresolvedExport`] if any exported value reads
    /// from a node that did not reach `Realized`.
    pub fn export(&self, table: &ExportTable) -> Result<BTreeMap<String, Value>> {
        let mut values = BTreeMap::new();
        for entry in table.iter() {
            for producer in entry.input.producers() {
                if !self.owns(&producer) {
                    return Err(CloudError::UnknownReference {
                        node: entry.name.clone(),
                        reference: producer.id().to_string(),
                    });
                }
                if !self.states[producer.key().index()].is_realized() {
                    return Err(CloudError::UnresolvedExport {
                        name: entry.name.clone(),
                        producer: producer.id().to_string(),
                    });
                }
            }
            values.insert(entry.name.clone(), entry.input.resolve(self)?);
        }
        Ok(values)
    }

    pub(crate) fn owns(&self, node: &NodeRef) -> bool {
        node.key().graph == self.tag && node.key().index() < self.nodes.len()
    }

    // ===== resolver internals =====

    pub(crate) fn order_indices(&self) -> &[usize] {
        &self.order
    }

    pub(crate) fn decl(&self, index: usize) -> &NodeDecl {
        &self.nodes[index]
    }

    pub(crate) fn state_at(&self, index: usize) -> &NodeState {
        &self.states[index]
    }

    pub(crate) fn outputs_at(&self, index: usize) -> Option<&Properties> {
        self.outputs[index].as_deref()
    }

    pub(crate) fn set_state(&mut self, index: usize, state: NodeState) {
        self.states[index] = state;
    }

    pub(crate) fn mark_realized(&mut self, index: usize, outputs: Properties) {
        self.outputs[index] = Some(Arc::new(outputs));
        self.states[index] = NodeState::Realized;
    }

    pub(crate) fn dependency_indices(&self, index: usize) -> &BTreeSet<usize> {
        &self.dependencies[index]
    }

    pub(crate) fn dependent_indices(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    /// Whether every dependency of `index` is realized
    pub(crate) fn is_ready(&self, index: usize) -> bool {
        self.dependencies[index]
            .iter()
            .all(|&d| self.states[d].is_realized())
    }

    /// Ids of the resources `index` depends on, looking through invoke nodes
    pub(crate) fn resource_dependencies(&self, index: usize) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<usize> = self.dependencies[index].iter().copied().collect();
        while let Some(dep) = stack.pop() {
            if !seen.insert(dep) {
                continue;
            }
            if self.nodes[dep].role == NodeRole::Invoke {
                stack.extend(self.dependencies[dep].iter().copied());
            }
        }
        seen.into_iter()
            .filter(|&d| self.nodes[d].role == NodeRole::Resource)
            .map(|d| self.nodes[d].id.clone())
            .collect()
    }
}

impl OutputSource for DependencyGraph {
    fn outputs(&self, node: &NodeRef) -> Option<&Properties> {
        if !self.owns(node) {
            return None;
        }
        let index = node.key().index();
        if self.states[index].is_realized() {
            self.outputs[index].as_deref()
        } else {
            None
        }
    }
}

/// Walk remaining (non-zero in-degree) nodes until one repeats
fn find_cycle(dependencies: &[BTreeSet<usize>], in_degree: &[usize]) -> Vec<usize> {
    let Some(start) = (0..in_degree.len()).find(|&i| in_degree[i] > 0) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&next) = dependencies[current].iter().find(|&&d| in_degree[d] > 0) else {
            return path;
        };
        if let Some(pos) = path.iter().position(|&p| p == next) {
            let mut cycle = path.split_off(pos);
            cycle.push(next);
            return cycle;
        }
        path.push(next);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CloudError;
    use crate::registry::GraphBuilder;
    use crate::value::Inputs;

    #[test]
    fn test_independent_nodes_keep_declaration_order() {
        let mut builder = GraphBuilder::new();
        builder.declare("test:a", "c", Inputs::new()).unwrap();
        builder.declare("test:a", "a", Inputs::new()).unwrap();
        builder.declare("test:a", "b", Inputs::new()).unwrap();

        let graph = builder.finalize().unwrap();
        assert_eq!(graph.order(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_order_respects_late_wired_dependencies() {
        let mut builder = GraphBuilder::new();
        let vm = builder.declare("test:vm", "vm", Inputs::new()).unwrap();
        let nic = builder.declare("test:nic", "nic", Inputs::new()).unwrap();
        let subnet = builder.declare("test:subnet", "subnet", Inputs::new()).unwrap();
        builder.set_input(&vm, "nicId", nic.output("id")).unwrap();
        builder.set_input(&nic, "subnetId", subnet.output("id")).unwrap();

        let graph = builder.finalize().unwrap();
        assert_eq!(graph.order(), vec!["subnet", "nic", "vm"]);
        assert_eq!(graph.dependencies("vm"), vec!["nic"]);
    }

    #[test]
    fn test_cycle_is_rejected_with_path() {
        let mut builder = GraphBuilder::new();
        let a = builder.declare("test:a", "a", Inputs::new()).unwrap();
        let b = builder
            .declare("test:b", "b", Inputs::new().with("x", a.output("id")))
            .unwrap();
        builder.set_input(&a, "y", b.output("id")).unwrap();

        match builder.finalize() {
            Err(CloudError::CyclicDependency(cycle)) => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"a".to_string()));
                assert!(cycle.contains(&"b".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut builder = GraphBuilder::new();
        let a = builder.declare("test:a", "a", Inputs::new()).unwrap();
        builder.depends_on(&a, &a).unwrap();

        assert!(matches!(
            builder.finalize(),
            Err(CloudError::CyclicDependency(ref c)) if c == &["a", "a"]
        ));
    }

    #[test]
    fn test_new_graph_is_pending() {
        let mut builder = GraphBuilder::new();
        builder.declare("test:a", "a", Inputs::new()).unwrap();
        let graph = builder.finalize().unwrap();

        assert_eq!(graph.state("a"), Some(&super::NodeState::Pending));
        assert!(graph.outputs_of("a").is_none());
        assert!(!graph.is_complete());
    }
}
