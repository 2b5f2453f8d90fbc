//! Action types for planning and destroying resources

use crate::value::Properties;
use serde::{Deserialize, Serialize};

/// Represents a planned action for a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Node id
    pub id: String,

    /// Type of action to perform
    pub action_type: ActionType,

    /// Provider resource type or invoke function
    pub kind: String,

    /// Description of the action
    pub description: String,

    /// Input names whose value is only known after an upstream realization
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_inputs: Vec<String>,

    /// Inputs for display: secrets masked, deferred values as `<node.attribute>`
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub inputs: Properties,
}

impl Action {
    pub fn new(id: impl Into<String>, action_type: ActionType, kind: impl Into<String>) -> Self {
        let id = id.into();
        let kind = kind.into();
        let description = match action_type {
            ActionType::Create => format!("create {kind} '{id}'"),
            ActionType::Update => format!("update {kind} '{id}'"),
            ActionType::Delete => format!("delete {kind} '{id}'"),
            ActionType::Read => format!("read {kind} into '{id}'"),
            ActionType::NoOp => format!("{kind} '{id}' is up to date"),
        };
        Self {
            id,
            action_type,
            kind,
            description,
            unknown_inputs: Vec::new(),
            inputs: Properties::new(),
        }
    }

    pub fn with_unknown_inputs(mut self, names: Vec<String>) -> Self {
        self.unknown_inputs = names;
        self
    }

    pub fn with_inputs(mut self, inputs: Properties) -> Self {
        self.inputs = inputs;
        self
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Update an existing resource
    Update,
    /// Delete a resource
    Delete,
    /// Call a data source
    Read,
    /// No changes needed
    NoOp,
}

impl ActionType {
    /// Marker used when printing a plan
    pub fn symbol(&self) -> &'static str {
        match self {
            ActionType::Create => "+",
            ActionType::Update => "~",
            ActionType::Delete => "-",
            ActionType::Read => "<=",
            ActionType::NoOp => " ",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::Read => write!(f, "read"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Result of applying actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Successfully applied actions
    pub succeeded: Vec<ActionResult>,

    /// Failed actions
    pub failed: Vec<ActionResult>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn add_success(&mut self, action_id: String, message: String) {
        self.succeeded.push(ActionResult {
            action_id,
            success: true,
            message,
            error: None,
        });
    }

    pub fn add_failure(&mut self, action_id: String, error: String) {
        self.failed.push(ActionResult {
            action_id,
            success: false,
            message: String::new(),
            error: Some(error),
        });
    }
}

impl Default for ApplyResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a single action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    /// ID of the action
    pub action_id: String,

    /// Whether the action succeeded
    pub success: bool,

    /// Success message
    pub message: String,

    /// Error message if failed
    pub error: Option<String>,
}

/// Plan containing all actions, in the order they would be applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// List of actions to perform
    pub actions: Vec<Action>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions
            .iter()
            .any(|a| !matches!(a.action_type, ActionType::NoOp | ActionType::Read));
        Self {
            actions,
            has_changes,
        }
    }

    pub fn empty() -> Self {
        Self {
            actions: Vec::new(),
            has_changes: false,
        }
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            read: self.actions_by_type(ActionType::Read).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub read: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create, self.update, self.delete, self.no_change
        )?;
        if self.read > 0 {
            write!(f, ", {} to read", self.read)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_are_not_changes() {
        let plan = Plan::new(vec![
            Action::new("keys", ActionType::Read, "azure:storage:listKeys"),
            Action::new("rg", ActionType::NoOp, "azure:resources:ResourceGroup"),
        ]);
        assert!(!plan.has_changes);
        assert_eq!(
            plan.summary().to_string(),
            "0 to create, 0 to update, 0 to delete, 1 unchanged, 1 to read"
        );
    }

    #[test]
    fn test_summary_counts() {
        let plan = Plan::new(vec![
            Action::new("a", ActionType::Create, "test:a"),
            Action::new("b", ActionType::Create, "test:b"),
            Action::new("c", ActionType::Delete, "test:c"),
        ]);
        assert!(plan.has_changes);
        let summary = plan.summary();
        assert_eq!((summary.create, summary.delete), (2, 1));
        assert_eq!(plan.action("c").unwrap().description, "delete test:c 'c'");
    }
}
