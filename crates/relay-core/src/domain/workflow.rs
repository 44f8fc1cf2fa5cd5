//! Workflow definitions and the shapes of control-flow step parameters.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::task::TaskType;

/// A workflow definition: an ordered list of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub tasks: Vec<WorkflowTask>,
}

impl Workflow {
    /// Returns the first duplicated or empty step name, if any.
    pub fn invalid_step_name(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.tasks
            .iter()
            .map(|task| task.name.as_str())
            .find(|name| name.is_empty() || !seen.insert(*name))
    }
}

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl WorkflowTask {
    pub fn new(name: impl Into<String>, task_type: impl Into<TaskType>) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// Control-flow constructs the coordinator interprets itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    Branch,
    Each,
    Fork,
}

impl ControlKind {
    pub const TASK_TYPES: [&'static str; 4] = ["branch", "each", "loop", "fork"];

    pub fn of(task_type: &TaskType) -> Option<Self> {
        match task_type.as_str() {
            "branch" => Some(ControlKind::Branch),
            "each" | "loop" => Some(ControlKind::Each),
            "fork" => Some(ControlKind::Fork),
            _ => None,
        }
    }
}

/// One `cases` entry of a `branch` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCase {
    pub key: Value,
    #[serde(default)]
    pub tasks: Vec<WorkflowTask>,
}
