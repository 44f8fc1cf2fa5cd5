//! TaskExecutor - registry と ContextFactory をつなぐ
//!
//! 1 回の呼び出しごとに ExecutionContext を作り、handler が返ったら破棄します。
//! リトライもタイムアウトもこの層では行いません。

use std::sync::Arc;

use serde_json::Value;
use tracing::Instrument;

use crate::context::{ContextFactory, ContextParams};
use crate::domain::errors::TaskExecutionError;
use crate::domain::execution::TaskExecution;

use super::registry::TaskHandlerRegistry;

pub struct TaskExecutor {
    registry: Arc<TaskHandlerRegistry>,
    contexts: ContextFactory,
}

impl TaskExecutor {
    pub fn new(registry: Arc<TaskHandlerRegistry>, contexts: ContextFactory) -> Self {
        Self { registry, contexts }
    }

    pub fn registry(&self) -> &TaskHandlerRegistry {
        &self.registry
    }

    /// Execute one task by looking up its handler.
    pub async fn handle(&self, execution: &TaskExecution) -> Result<Value, TaskExecutionError> {
        let task_type = execution.task.task_type();
        let handler = self
            .registry
            .get(task_type)
            .ok_or_else(|| TaskExecutionError::handler_not_found(task_type))?;

        let context = self.contexts.create(&ContextParams::from_execution(execution));
        let span = tracing::info_span!(
            "task",
            task_type = %task_type,
            task_id = %execution.id(),
            job_id = execution.job_id.map(|id| id.to_string()),
        );

        let result = handler.handle(execution, &context).instrument(span).await;
        if let Err(e) = &result {
            tracing::debug!(task_type = %task_type, kind = ?e.kind(), error = %e, "handler failed");
        }
        result
    }
}
