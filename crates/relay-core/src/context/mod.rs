//! Execution Context - handler 1 回の呼び出しに渡す capability の束
//!
//! - **Data**: スコープ付き key/value（`Active` / `Disabled`）
//! - **Event**: 進捗通知（`Active` / `Disabled`）
//! - **File**: blob の保存と読み出し
//!
//! `Active` / `Disabled` の選択は生成時に一度だけ行い、呼び出し側の
//! インターフェースはどちらでも同じです。コラボレータはすべて
//! `ContextFactory` に明示的に渡します（グローバルな lookup はしない）。

pub mod data;
pub mod event;
pub mod file;

use std::sync::Arc;

use crate::domain::execution::{ExecutionType, TaskExecution};
use crate::domain::ids::{InstanceId, JobId, TaskId, WorkflowId};
use crate::domain::scope::ScopeBinding;
use crate::ports::{Clock, DataStorage, EventSink, FileStorage};

pub use self::data::{Data, ScopedData};
pub use self::event::Event;
pub use self::file::File;

/// Coordinates a context is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextParams {
    pub component_name: String,
    pub component_version: u32,
    pub action_name: String,
    pub instance_id: Option<InstanceId>,
    pub execution_type: Option<ExecutionType>,
    pub workflow_id: Option<WorkflowId>,
    pub job_id: Option<JobId>,
    pub task_id: Option<TaskId>,
}

impl ContextParams {
    pub fn from_execution(execution: &TaskExecution) -> Self {
        let component = execution.task.task_type().component_ref();
        Self {
            component_name: component.name,
            component_version: component.version,
            action_name: component.action,
            instance_id: execution.instance_id,
            execution_type: execution.execution_type,
            workflow_id: execution.workflow_id,
            job_id: execution.job_id,
            task_id: Some(execution.id()),
        }
    }

    pub fn scope_binding(&self) -> ScopeBinding {
        ScopeBinding {
            job_id: self.job_id,
            instance_id: self.instance_id,
            workflow_id: self.workflow_id,
        }
    }
}

/// Builds one `ExecutionContext` per invocation.
#[derive(Clone)]
pub struct ContextFactory {
    data_storage: Arc<dyn DataStorage>,
    event_sink: Arc<dyn EventSink>,
    file_storage: Arc<dyn FileStorage>,
    clock: Arc<dyn Clock>,
    file_directory: String,
}

impl ContextFactory {
    pub fn new(
        data_storage: Arc<dyn DataStorage>,
        event_sink: Arc<dyn EventSink>,
        file_storage: Arc<dyn FileStorage>,
        clock: Arc<dyn Clock>,
        file_directory: impl Into<String>,
    ) -> Self {
        Self {
            data_storage,
            event_sink,
            file_storage,
            clock,
            file_directory: file_directory.into(),
        }
    }

    pub fn create(&self, params: &ContextParams) -> ExecutionContext {
        ExecutionContext {
            data: Data::new(Arc::clone(&self.data_storage), params),
            event: Event::new(Arc::clone(&self.event_sink), Arc::clone(&self.clock), params),
            file: File::new(Arc::clone(&self.file_storage), self.file_directory.clone()),
        }
    }
}

/// Owned by a single handler invocation and dropped when it returns.
pub struct ExecutionContext {
    data: Data,
    event: Event,
    file: File,
}

impl ExecutionContext {
    pub fn new(data: Data, event: Event, file: File) -> Self {
        Self { data, event, file }
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}
