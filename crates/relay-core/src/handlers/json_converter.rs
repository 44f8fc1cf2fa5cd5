//! `jsonConverter` - JSON テキストと値の相互変換
//!
//! - `FROM_JSON`: 文字列 `input` を汎用値（object / array / primitive）へ
//! - `TO_JSON`: 任意の `input` を正規化された JSON テキストへ

use async_trait::async_trait;
use serde_json::Value;

use crate::app::TaskHandler;
use crate::context::ExecutionContext;
use crate::domain::errors::TaskExecutionError;
use crate::domain::execution::TaskExecution;

pub const TASK_TYPE: &str = "jsonConverter";

const FROM_JSON: &str = "FROM_JSON";
const TO_JSON: &str = "TO_JSON";

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverterHandler;

#[async_trait]
impl TaskHandler for JsonConverterHandler {
    async fn handle(
        &self,
        execution: &TaskExecution,
        _context: &ExecutionContext,
    ) -> Result<Value, TaskExecutionError> {
        let task = &execution.task;
        let operation: String = task.required("operation")?;
        match operation.as_str() {
            FROM_JSON => {
                let input: String = task.required("input")?;
                Ok(serde_json::from_str(&input)?)
            }
            TO_JSON => {
                let input = task.required_value("input")?;
                Ok(Value::String(serde_json::to_string(input)?))
            }
            other => Err(TaskExecutionError::unsupported_operation(other)),
        }
    }
}
