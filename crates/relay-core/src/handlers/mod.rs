//! Built-in handlers
//!
//! - **jsonConverter**: JSON テキスト ⇔ 値
//! - **logger/v1/\***: ログ出力
//! - **files/v1/{write,read}**: File capability
//! - **dataStorage**: Data capability

pub mod data_storage;
pub mod files;
pub mod json_converter;
pub mod logger;

use std::sync::Arc;

use crate::app::{TaskHandler, TaskHandlerRegistry};
use crate::domain::errors::RegistryError;
use crate::domain::task::TaskType;

pub use self::data_storage::DataStorageHandler;
pub use self::files::FilesHandler;
pub use self::json_converter::JsonConverterHandler;
pub use self::logger::LoggerHandler;

/// Every built-in `(task_type, handler)` pair.
pub fn builtin_handlers() -> Vec<(TaskType, Arc<dyn TaskHandler>)> {
    let mut handlers: Vec<(TaskType, Arc<dyn TaskHandler>)> = vec![
        (
            TaskType::new(json_converter::TASK_TYPE),
            Arc::new(JsonConverterHandler),
        ),
        (
            TaskType::new(data_storage::TASK_TYPE),
            Arc::new(DataStorageHandler),
        ),
        (TaskType::new(files::WRITE), Arc::new(FilesHandler)),
        (TaskType::new(files::READ), Arc::new(FilesHandler)),
    ];
    for task_type in logger::TASK_TYPES {
        handlers.push((TaskType::new(task_type), Arc::new(LoggerHandler)));
    }
    handlers
}

pub fn register_builtin(registry: &mut TaskHandlerRegistry) -> Result<(), RegistryError> {
    for (task_type, handler) in builtin_handlers() {
        registry.register(task_type, handler)?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_handlers_register_without_conflict() {
        let mut registry = TaskHandlerRegistry::new();
        register_builtin(&mut registry).unwrap();

        assert_eq!(registry.len(), 8);
        assert!(registry.contains(&TaskType::new("logger/v1/warn")));

        let err = register_builtin(&mut registry).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateHandler(_)));
    }
}
