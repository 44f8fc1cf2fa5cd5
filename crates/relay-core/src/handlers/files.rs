//! `files/v1/write` / `files/v1/read` - File capability を使う handler

use async_trait::async_trait;
use serde_json::Value;

use crate::app::TaskHandler;
use crate::context::ExecutionContext;
use crate::domain::errors::TaskExecutionError;
use crate::domain::execution::TaskExecution;
use crate::domain::file_entry::FileEntry;

pub const WRITE: &str = "files/v1/write";
pub const READ: &str = "files/v1/read";

#[derive(Debug, Clone, Copy, Default)]
pub struct FilesHandler;

#[async_trait]
impl TaskHandler for FilesHandler {
    async fn handle(
        &self,
        execution: &TaskExecution,
        context: &ExecutionContext,
    ) -> Result<Value, TaskExecutionError> {
        let task = &execution.task;
        match task.task_type().component_ref().action.as_str() {
            "write" => {
                let name: String = task.required("fileName")?;
                let content: String = task.required("content")?;
                let entry = context.file().store_content(&name, &content).await?;
                Ok(serde_json::to_value(entry)?)
            }
            "read" => {
                let entry: FileEntry = task.required("fileEntry")?;
                Ok(Value::String(context.file().read_to_string(&entry).await?))
            }
            other => Err(TaskExecutionError::unsupported_operation(other)),
        }
    }
}
