//! Job record and status management.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::execution::{ExecutionFailure, ExecutionType, TaskExecution};
use super::ids::{InstanceId, JobId, TaskId, WorkflowId};
use super::workflow::WorkflowTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Running)
    }
}

/// One sequential line of steps. The root line is index 0; `each` and `fork`
/// open child lines that join back into their parent.
#[derive(Debug, Clone)]
pub(crate) struct Line {
    pub steps: VecDeque<WorkflowTask>,
    /// Values visible only to this line (`item`, `itemIndex`, ...).
    pub locals: Map<String, Value>,
    pub current: Option<TaskId>,
    pub join: Option<Join>,
    pub parent: Option<ParentSlot>,
    pub last_output: Value,
    pub done: bool,
}

impl Line {
    pub fn new(steps: impl IntoIterator<Item = WorkflowTask>, locals: Map<String, Value>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            locals,
            current: None,
            join: None,
            parent: None,
            last_output: Value::Null,
            done: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        !self.done && self.current.is_none() && self.join.is_none()
    }
}

/// Where a child line reports its final output.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParentSlot {
    pub line: usize,
    pub slot: usize,
    pub task_id: TaskId,
}

/// A control step waiting for its child lines.
#[derive(Debug, Clone)]
pub(crate) struct Join {
    pub step_name: String,
    pub execution: TaskExecution,
    pub pending: usize,
    pub results: Vec<Value>,
}

#[derive(Debug, Clone)]
pub(crate) struct InFlight {
    pub line: usize,
    pub step_name: String,
    pub execution: TaskExecution,
}

/// Job record: the coordinator's view of one workflow run.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: JobId,
    pub workflow_id: WorkflowId,
    pub instance_id: Option<InstanceId>,
    pub execution_type: Option<ExecutionType>,
    pub state: JobState,
    pub inputs: Map<String, Value>,
    /// Outputs of settled steps, by step name.
    pub outputs: Map<String, Value>,
    pub error: Option<ExecutionFailure>,
    /// Settled executions, in settlement order.
    pub executions: Vec<TaskExecution>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub(crate) lines: Vec<Line>,
    pub(crate) in_flight: HashMap<TaskId, InFlight>,
}

impl JobRecord {
    pub fn new(
        job_id: JobId,
        workflow_id: WorkflowId,
        steps: Vec<WorkflowTask>,
        inputs: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            workflow_id,
            instance_id: None,
            execution_type: None,
            state: JobState::Running,
            inputs,
            outputs: Map::new(),
            error: None,
            executions: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            lines: vec![Line::new(steps, Map::new())],
            in_flight: HashMap::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.finish(JobState::Completed, now);
    }

    pub fn mark_failed(&mut self, error: ExecutionFailure, now: DateTime<Utc>) {
        if self.is_running() {
            self.error = Some(error);
        }
        self.finish(JobState::Failed, now);
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.finish(JobState::Cancelled, now);
    }

    /// Work still in flight is recorded as cancelled; late results for it are ignored.
    fn finish(&mut self, state: JobState, now: DateTime<Utc>) {
        if !self.is_running() {
            return;
        }
        self.state = state;
        self.updated_at = now;
        self.completed_at = Some(now);
        for (_, InFlight { mut execution, .. }) in self.in_flight.drain() {
            execution.cancel(now);
            self.executions.push(execution);
        }
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.job_id,
            workflow_id: self.workflow_id,
            state: self.state,
            outputs: self.outputs.clone(),
            error: self.error.clone(),
            settled_tasks: self.executions.len(),
            running_tasks: self.in_flight.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        }
    }
}

/// Serializable view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub workflow_id: WorkflowId,
    pub state: JobState,
    pub outputs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionFailure>,
    pub settled_tasks: usize,
    pub running_tasks: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
