//! Resource node registry
//!
//! [`GraphBuilder`] accepts node declarations and validates them structurally.
//! Construction is append-only: every reference must point at a node that is
//! already registered. [`GraphBuilder::finalize`] then orders the nodes and
//! freezes them into a [`DependencyGraph`].

use crate::deferred::Deferred;
use crate::error::{CloudError, Result};
use crate::graph::DependencyGraph;
use crate::value::{Input, Inputs};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_GRAPH_TAG: AtomicU64 = AtomicU64::new(1);

/// Position of a node inside a specific builder/graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub(crate) graph: u64,
    pub(crate) index: usize,
}

impl NodeKey {
    /// Declaration index
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Handle to a declared node
#[derive(Debug, Clone)]
pub struct NodeRef {
    key: NodeKey,
    id: Arc<str>,
}

impl NodeRef {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }

    /// Deferred value of one of this node's output attributes
    pub fn output(&self, attribute: &str) -> Deferred {
        Deferred::output(self.clone(), attribute)
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for NodeRef {}

/// What realizing a node means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// A managed object: created or updated, persisted, destroyed
    Resource,
    /// A read-only data source call; never persisted or destroyed
    Invoke,
}

/// A declared node
#[derive(Debug, Clone)]
pub struct NodeDecl {
    /// Unique, stable identifier
    pub id: String,

    /// Provider resource type, or function name for invokes
    pub kind: String,

    pub role: NodeRole,

    pub inputs: Inputs,

    /// Ordering-only dependencies
    pub depends_on: Vec<NodeRef>,
}

impl NodeDecl {
    /// Declaration indices of every node this one depends on
    pub(crate) fn dependency_indices(&self) -> BTreeSet<usize> {
        self.inputs
            .producers()
            .iter()
            .chain(self.depends_on.iter())
            .map(|n| n.key.index)
            .collect()
    }
}

/// Registry of declared nodes
pub struct GraphBuilder {
    tag: u64,
    nodes: Vec<NodeDecl>,
    index: HashMap<String, usize>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            tag: NEXT_GRAPH_TAG.fetch_add(1, Ordering::Relaxed),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Declare a resource node
    pub fn declare(
        &mut self,
        kind: impl Into<String>,
        id: impl Into<String>,
        inputs: Inputs,
    ) -> Result<NodeRef> {
        self.push(NodeRole::Resource, kind.into(), id.into(), inputs)
    }

    /// Declare a read-only function call whose result feeds other nodes
    pub fn invoke(
        &mut self,
        function: impl Into<String>,
        id: impl Into<String>,
        inputs: Inputs,
    ) -> Result<NodeRef> {
        self.push(NodeRole::Invoke, function.into(), id.into(), inputs)
    }

    fn push(&mut self, role: NodeRole, kind: String, id: String, inputs: Inputs) -> Result<NodeRef> {
        if self.index.contains_key(&id) {
            return Err(CloudError::DuplicateId(id));
        }
        for producer in inputs.producers() {
            self.check_reference(&id, &producer)?;
        }

        let key = NodeKey {
            graph: self.tag,
            index: self.nodes.len(),
        };
        tracing::debug!(id = %id, kind = %kind, ?role, "Declared node");
        self.index.insert(id.clone(), key.index);
        let node = NodeRef {
            key,
            id: Arc::from(id.as_str()),
        };
        self.nodes.push(NodeDecl {
            id,
            kind,
            role,
            inputs,
            depends_on: Vec::new(),
        });
        Ok(node)
    }

    /// Set (or replace) one input of an already declared node
    ///
    /// Lets textual loaders declare every node first and wire references
    /// afterwards. Cycles created this way are reported by [`finalize`].
    ///
    /// [`finalize`]: GraphBuilder::finalize
    pub fn set_input(
        &mut self,
        node: &NodeRef,
        name: impl Into<String>,
        input: impl Into<Input>,
    ) -> Result<()> {
        let input = input.into();
        let index = self.resolve(node)?;
        let consumer = self.nodes[index].id.clone();
        for producer in input.producers() {
            self.check_reference(&consumer, &producer)?;
        }
        self.nodes[index].inputs.insert(name, input);
        Ok(())
    }

    /// Order `node` after `on` without reading any of its outputs
    pub fn depends_on(&mut self, node: &NodeRef, on: &NodeRef) -> Result<()> {
        let index = self.resolve(node)?;
        let consumer = self.nodes[index].id.clone();
        self.check_reference(&consumer, on)?;
        if !self.nodes[index].depends_on.contains(on) {
            self.nodes[index].depends_on.push(on.clone());
        }
        Ok(())
    }

    /// Look up a declared node by id
    pub fn get(&self, id: &str) -> Option<NodeRef> {
        self.index.get(id).map(|&index| NodeRef {
            key: NodeKey {
                graph: self.tag,
                index,
            },
            id: Arc::from(id),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `node` was declared by this builder
    pub fn contains(&self, node: &NodeRef) -> bool {
        node.key.graph == self.tag && node.key.index < self.nodes.len()
    }

    fn resolve(&self, node: &NodeRef) -> Result<usize> {
        if self.contains(node) {
            Ok(node.key.index)
        } else {
            Err(CloudError::UnknownReference {
                node: node.id().to_string(),
                reference: node.id().to_string(),
            })
        }
    }

    fn check_reference(&self, consumer: &str, producer: &NodeRef) -> Result<()> {
        if self.contains(producer) {
            Ok(())
        } else {
            Err(CloudError::UnknownReference {
                node: consumer.to_string(),
                reference: producer.id().to_string(),
            })
        }
    }

    /// Order the declared nodes topologically and freeze them
    ///
    /// Nodes without an ordering constraint between them keep their
    /// declaration order, so identical input always yields the same order.
    pub fn finalize(self) -> Result<DependencyGraph> {
        DependencyGraph::build(self.tag, self.nodes, self.index)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_id_is_rejected() {
        let mut builder = GraphBuilder::new();
        builder.declare("azure:resources:ResourceGroup", "rg", Inputs::new()).unwrap();

        let err = builder
            .declare("azure:network:VirtualNetwork", "rg", Inputs::new())
            .unwrap_err();
        assert!(matches!(err, CloudError::DuplicateId(ref id) if id == "rg"));
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_reference_from_another_builder_is_unknown() {
        let mut other = GraphBuilder::new();
        let foreign = other.declare("test:a", "a", Inputs::new()).unwrap();

        let mut builder = GraphBuilder::new();
        let err = builder
            .declare("test:b", "b", Inputs::new().with("a", foreign.output("id")))
            .unwrap_err();
        assert!(matches!(
            err,
            CloudError::UnknownReference { ref node, ref reference } if node == "b" && reference == "a"
        ));
        assert!(builder.is_empty());
    }

    #[test]
    fn test_set_input_and_depends_on_check_membership() {
        let mut other = GraphBuilder::new();
        let foreign = other.declare("test:a", "a", Inputs::new()).unwrap();

        let mut builder = GraphBuilder::new();
        let b = builder.declare("test:b", "b", Inputs::new()).unwrap();

        assert!(builder.set_input(&b, "x", foreign.output("id")).is_err());
        assert!(builder.depends_on(&b, &foreign).is_err());
        assert!(builder.set_input(&foreign, "x", "literal").is_err());
    }

    #[test]
    fn test_get_returns_equal_handle() {
        let mut builder = GraphBuilder::new();
        let vnet = builder.declare("test:vnet", "vnet", Inputs::new()).unwrap();

        assert_eq!(builder.get("vnet"), Some(vnet));
        assert!(builder.get("missing").is_none());
    }

    #[test]
    fn test_invoke_node_role() {
        let mut builder = GraphBuilder::new();
        let sa = builder.declare("test:sa", "sa", Inputs::new()).unwrap();
        builder
            .invoke("test:listKeys", "keys", Inputs::new().with("account", sa.output("name")))
            .unwrap();

        let graph = builder.finalize().unwrap();
        assert_eq!(graph.node("keys").unwrap().role, NodeRole::Invoke);
        assert_eq!(graph.dependencies("keys"), vec!["sa"]);
    }
}
