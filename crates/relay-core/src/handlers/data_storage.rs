//! `dataStorage` - Data capability を使う handler
//!
//! action 座標が 1 つなので、どの operation も同じキー空間を読み書きします。
//! パラメータ: `operation`（SET_VALUE / GET_VALUE / FETCH_VALUE）, `scope`, `key`, `value`

use async_trait::async_trait;
use serde_json::Value;

use crate::app::TaskHandler;
use crate::context::ExecutionContext;
use crate::domain::errors::TaskExecutionError;
use crate::domain::execution::TaskExecution;
use crate::domain::scope::Scope;

pub const TASK_TYPE: &str = "dataStorage";

#[derive(Debug, Clone, Copy, Default)]
pub struct DataStorageHandler;

#[async_trait]
impl TaskHandler for DataStorageHandler {
    async fn handle(
        &self,
        execution: &TaskExecution,
        context: &ExecutionContext,
    ) -> Result<Value, TaskExecutionError> {
        let task = &execution.task;
        let operation: String = task.required("operation")?;
        let scope: Scope = task.required::<String>("scope")?.parse()?;
        let key: String = task.required("key")?;
        let data = context.data();

        match operation.as_str() {
            "SET_VALUE" => {
                let value = task.required_value("value")?.clone();
                data.set_value(scope, &key, &value).await?;
                Ok(value)
            }
            "GET_VALUE" => Ok(data.get_value(scope, &key).await?),
            "FETCH_VALUE" => Ok(data.fetch_value(scope, &key).await?.unwrap_or(Value::Null)),
            other => Err(TaskExecutionError::unsupported_operation(other)),
        }
    }
}
