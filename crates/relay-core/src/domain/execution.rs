//! TaskExecution: a Task bound to a concrete run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::TaskExecutionError;
use super::ids::{InstanceId, JobId, TaskId, WorkflowId};
use super::task::Task;

/// Execution status.
///
/// - Created -> Started -> Completed
/// - Created -> Started -> Failed
/// - any non-terminal -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    Started,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Persistence category an action declares. Part of every Data key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    Automation,
    Embedded,
    Platform,
}

impl ExecutionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionType::Automation => "AUTOMATION",
            ExecutionType::Embedded => "EMBEDDED",
            ExecutionType::Platform => "PLATFORM",
        }
    }
}

impl std::str::FromStr for ExecutionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            ExecutionType::Automation,
            ExecutionType::Embedded,
            ExecutionType::Platform,
        ]
        .into_iter()
        .find(|t| t.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("unknown execution type '{s}'"))
    }
}

/// Serializable record of a handler failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub message: String,
    /// Messages of the cause chain, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl From<&TaskExecutionError> for ExecutionFailure {
    fn from(error: &TaskExecutionError) -> Self {
        let mut causes = Vec::new();
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: error.message().to_string(),
            causes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub task: Task,
    pub job_id: Option<JobId>,
    pub workflow_id: Option<WorkflowId>,
    pub instance_id: Option<InstanceId>,
    pub execution_type: Option<ExecutionType>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionFailure>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskExecution {
    pub fn new(task: Task, job_id: JobId, workflow_id: WorkflowId, now: DateTime<Utc>) -> Self {
        Self {
            job_id: Some(job_id),
            workflow_id: Some(workflow_id),
            ..Self::detached(task, now)
        }
    }

    /// Design-time execution, not bound to any job.
    pub fn detached(task: Task, now: DateTime<Utc>) -> Self {
        Self {
            task,
            job_id: None,
            workflow_id: None,
            instance_id: None,
            execution_type: None,
            status: TaskStatus::Created,
            output: None,
            progress: 0,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_instance(mut self, instance_id: Option<InstanceId>) -> Self {
        self.instance_id = instance_id;
        self
    }

    pub fn with_execution_type(mut self, execution_type: Option<ExecutionType>) -> Self {
        self.execution_type = execution_type;
        self
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        if self.status == TaskStatus::Created {
            self.status = TaskStatus::Started;
            self.started_at = Some(now);
        }
    }

    pub fn complete(&mut self, output: Value, now: DateTime<Utc>) {
        if !self.status.is_terminal() {
            self.status = TaskStatus::Completed;
            self.output = Some(output);
            self.progress = 100;
            self.completed_at = Some(now);
        }
    }

    pub fn fail(&mut self, error: ExecutionFailure, now: DateTime<Utc>) {
        if !self.status.is_terminal() {
            self.status = TaskStatus::Failed;
            self.error = Some(error);
            self.completed_at = Some(now);
        }
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        if !self.status.is_terminal() {
            self.status = TaskStatus::Cancelled;
            self.completed_at = Some(now);
        }
    }

    pub fn set_progress(&mut self, progress: u8) {
        if !self.status.is_terminal() {
            self.progress = progress.min(100);
        }
    }
}
