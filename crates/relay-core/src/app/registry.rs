use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::domain::errors::{RegistryError, TaskExecutionError};
use crate::domain::execution::TaskExecution;
use crate::domain::task::TaskType;

/// A handler for a specific task type.
///
/// Takes the whole `TaskExecution` so the handler can read typed parameters
/// and the runtime ids, plus the per-invocation context.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(
        &self,
        execution: &TaskExecution,
        context: &ExecutionContext,
    ) -> Result<Value, TaskExecutionError>;
}

/// Registry of handlers (task_type -> handler).
///
/// Design:
/// - Built during initialization (mutable).
/// - Used during runtime (immutable, shared through `Arc`).
#[derive(Default)]
pub struct TaskHandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a task type. A second registration is an error.
    pub fn register(
        &mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&task_type) {
            return Err(RegistryError::DuplicateHandler(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &TaskType) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type)
    }

    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Sorted, so callers get a stable order.
    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHandler;

    #[async_trait]
    impl TaskHandler for NullHandler {
        async fn handle(
            &self,
            _execution: &TaskExecution,
            _context: &ExecutionContext,
        ) -> Result<Value, TaskExecutionError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = TaskHandlerRegistry::new();
        reg.register(TaskType::new("ok"), Arc::new(NullHandler))
            .unwrap();

        let err = reg
            .register(TaskType::new("ok"), Arc::new(NullHandler))
            .unwrap_err();

        assert!(matches!(err, RegistryError::DuplicateHandler(t) if t.as_str() == "ok"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn registered_types_are_sorted() {
        let mut reg = TaskHandlerRegistry::new();
        for t in ["logger/v1/warn", "jsonConverter", "files/v1/read"] {
            reg.register(TaskType::new(t), Arc::new(NullHandler)).unwrap();
        }

        let types: Vec<String> = reg
            .registered_types()
            .into_iter()
            .map(|t| t.as_str().to_string())
            .collect();
        assert_eq!(types, vec!["files/v1/read", "jsonConverter", "logger/v1/warn"]);
        assert!(reg.contains(&TaskType::new("jsonConverter")));
        assert!(reg.get(&TaskType::new("missing")).is_none());
    }
}
