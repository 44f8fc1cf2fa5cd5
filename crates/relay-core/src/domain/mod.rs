//! Domain model (IDs, tasks, executions, scopes, workflows, jobs, errors).

pub mod errors;
pub mod events;
pub mod execution;
pub mod file_entry;
pub mod ids;
pub mod job;
pub mod scope;
pub mod task;
pub mod workflow;

pub use errors::{
    BrokerError, ConfigError, DataError, DispatchError, ErrorKind, EventSinkError,
    FileStorageError, ParameterError, RegistryError, TaskExecutionError,
};
pub use events::ProgressEvent;
pub use execution::{ExecutionFailure, ExecutionType, TaskExecution, TaskStatus};
pub use file_entry::FileEntry;
pub use ids::{InstanceId, JobId, TaskId, WorkflowId};
pub use job::{JobRecord, JobState, JobStatus};
pub use scope::{Scope, ScopeBinding};
pub use task::{ComponentRef, Task, TaskType};
pub use workflow::{BranchCase, ControlKind, Workflow, WorkflowTask};
