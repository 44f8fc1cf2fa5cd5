//! `logger/v1/{debug,info,warn,error}` - `text` を action のレベルでログ出力

use async_trait::async_trait;
use serde_json::Value;

use crate::app::TaskHandler;
use crate::context::ExecutionContext;
use crate::domain::errors::TaskExecutionError;
use crate::domain::execution::TaskExecution;

pub const TASK_TYPES: [&str; 4] = [
    "logger/v1/debug",
    "logger/v1/info",
    "logger/v1/warn",
    "logger/v1/error",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggerHandler;

#[async_trait]
impl TaskHandler for LoggerHandler {
    async fn handle(
        &self,
        execution: &TaskExecution,
        _context: &ExecutionContext,
    ) -> Result<Value, TaskExecutionError> {
        let text: String = execution.task.optional("text")?.unwrap_or_default();
        let task_id = execution.id();
        match execution.task.task_type().component_ref().action.as_str() {
            "debug" => tracing::debug!(target: "relay::logger", %task_id, "{text}"),
            "info" => tracing::info!(target: "relay::logger", %task_id, "{text}"),
            "warn" => tracing::warn!(target: "relay::logger", %task_id, "{text}"),
            "error" => tracing::error!(target: "relay::logger", %task_id, "{text}"),
            other => return Err(TaskExecutionError::unsupported_operation(other)),
        }
        Ok(Value::Null)
    }
}
