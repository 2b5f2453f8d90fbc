//! Change preview
//!
//! Compares a graph against persisted state without calling any provider.
//! Values produced by nodes that would be created, updated or read are
//! unknown at plan time; a node that consumes such a value is planned as an
//! update even if its stored digest would otherwise match.

use crate::action::{Action, ActionType, Plan};
use crate::deferred::OutputSource;
use crate::graph::DependencyGraph;
use crate::registry::{NodeRef, NodeRole};
use crate::state::StackState;
use crate::value::Properties;

/// Outputs known before anything runs
struct KnownOutputs<'a, 'g> {
    graph: &'g DependencyGraph,
    known: &'a [Option<&'g Properties>],
}

impl OutputSource for KnownOutputs<'_, '_> {
    fn outputs(&self, node: &NodeRef) -> Option<&Properties> {
        if !self.graph.owns(node) {
            return None;
        }
        self.known[node.key().index()]
    }
}

/// Preview the actions a run followed by a prune would perform
pub fn plan(graph: &DependencyGraph, state: &StackState) -> Plan {
    let mut known: Vec<Option<&Properties>> = vec![None; graph.len()];
    let mut actions = Vec::with_capacity(graph.len());

    for &node in graph.order_indices() {
        let decl = graph.decl(node);

        if graph.state_at(node).is_realized() {
            known[node] = graph.outputs_at(node);
            actions.push(Action::new(&decl.id, ActionType::NoOp, &decl.kind));
            continue;
        }
        if decl.role == NodeRole::Invoke {
            actions.push(Action::new(&decl.id, ActionType::Read, &decl.kind));
            continue;
        }

        let source = KnownOutputs {
            graph,
            known: &known,
        };
        let stored = state.get_resource(&decl.id);
        let action = match decl.inputs.evaluate(&source) {
            Ok(inputs) => match stored {
                None => Action::new(&decl.id, ActionType::Create, &decl.kind),
                Some(_) if state.matching(&decl.id, &decl.kind, &inputs).is_some() => {
                    Action::new(&decl.id, ActionType::NoOp, &decl.kind)
                }
                Some(_) => Action::new(&decl.id, ActionType::Update, &decl.kind),
            },
            Err(_) => {
                let unknown = decl
                    .inputs
                    .iter()
                    .filter(|(_, input)| input.evaluate(&source).is_err())
                    .map(|(name, _)| name.clone())
                    .collect();
                let action_type = if stored.is_some() {
                    ActionType::Update
                } else {
                    ActionType::Create
                };
                Action::new(&decl.id, action_type, &decl.kind).with_unknown_inputs(unknown)
            }
        };

        let action = match action.action_type {
            ActionType::Create | ActionType::Update => action.with_inputs(decl.inputs.redacted()),
            _ => action,
        };
        if action.action_type == ActionType::NoOp {
            known[node] = stored.map(|entry| &entry.outputs);
        }
        actions.push(action);
    }

    let mut removed: Vec<&str> = state
        .creation_order()
        .into_iter()
        .filter(|id| !graph.contains(id))
        .collect();
    removed.reverse();
    for id in removed {
        if let Some(entry) = state.get_resource(id) {
            actions.push(Action::new(id, ActionType::Delete, &entry.kind));
        }
    }

    Plan::new(actions)
}
