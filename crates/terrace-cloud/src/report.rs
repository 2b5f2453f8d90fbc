//! Per-run report

use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to a node during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum NodeOutcome {
    /// Realized for the first time
    Created,
    /// Realized again because its inputs changed
    Updated,
    /// Already realized, or restored from persisted state
    Unchanged,
    /// Data source call succeeded
    Read,
    Failed(String),
    Skipped { blocked_by: String },
    /// Run was cancelled before the node was scheduled
    NotStarted,
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            NodeOutcome::Created | NodeOutcome::Updated | NodeOutcome::Unchanged | NodeOutcome::Read
        )
    }
}

impl fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeOutcome::Created => write!(f, "created"),
            NodeOutcome::Updated => write!(f, "updated"),
            NodeOutcome::Unchanged => write!(f, "unchanged"),
            NodeOutcome::Read => write!(f, "read"),
            NodeOutcome::Failed(cause) => write!(f, "failed: {cause}"),
            NodeOutcome::Skipped { blocked_by } => write!(f, "skipped (blocked by {blocked_by})"),
            NodeOutcome::NotStarted => write!(f, "not started"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: String,
    pub kind: String,
    #[serde(flatten)]
    pub outcome: NodeOutcome,
}

/// Outcome of every node, in topological order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub nodes: Vec<NodeReport>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,

    /// Whether the run stopped scheduling because of cancellation
    pub cancelled: bool,
}

impl RunReport {
    /// Every node succeeded and nothing was cancelled
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.nodes.iter().all(|n| n.outcome.is_success())
    }

    pub fn outcome(&self, id: &str) -> Option<&NodeOutcome> {
        self.nodes.iter().find(|n| n.id == id).map(|n| &n.outcome)
    }

    pub fn failed(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.outcome, NodeOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.outcome, NodeOutcome::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&NodeOutcome) -> bool) -> usize {
        self.nodes.iter().filter(|n| pred(&n.outcome)).count()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            created: self.count(|o| *o == NodeOutcome::Created),
            updated: self.count(|o| *o == NodeOutcome::Updated),
            unchanged: self.count(|o| *o == NodeOutcome::Unchanged),
            read: self.count(|o| *o == NodeOutcome::Read),
            failed: self.count(|o| matches!(o, NodeOutcome::Failed(_))),
            skipped: self.count(|o| matches!(o, NodeOutcome::Skipped { .. })),
            not_started: self.count(|o| *o == NodeOutcome::NotStarted),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub read: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_started: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} unchanged, {} failed, {} skipped",
            self.created, self.updated, self.unchanged, self.failed, self.skipped
        )?;
        if self.read > 0 {
            write!(f, ", {} read", self.read)?;
        }
        if self.not_started > 0 {
            write!(f, ", {} not started", self.not_started)?;
        }
        Ok(())
    }
}
