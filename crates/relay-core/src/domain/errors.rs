//! Errors - エラー型と分類
//!
//! 関心ごとに 1 つの enum を定義し、handler から見えるエラーは
//! `TaskExecutionError` に集約します。

use std::path::PathBuf;

use thiserror::Error;

use super::scope::Scope;
use super::task::TaskType;

/// Dispatch resolution / hand-off failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No resolver in the chain claimed the task. Configuration defect; never retried.
    #[error("unresolved task type '{0}'")]
    UnresolvedTaskType(TaskType),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker operation failed: {0}")]
    OperationFailed(String),

    #[error("delivery {tag} on channel '{channel}' is no longer in flight")]
    UnknownDelivery { channel: String, tag: u64 },
}

/// Missing or malformed task parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("required parameter '{key}' is missing")]
    Missing { key: String },

    #[error("parameter '{key}' is invalid: {message}")]
    Invalid { key: String, message: String },
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("no value stored for key '{key}' at scope {scope}")]
    MissingValue { scope: Scope, key: String },

    #[error("scope {0} has no bound id for this execution")]
    UnboundScope(Scope),

    #[error("value for key '{key}' could not be converted: {source}")]
    Conversion {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("data storage failure: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum FileStorageError {
    #[error("unable to store file {name}")]
    Store {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("file {name} does not exist")]
    NotFound { name: String },

    #[error("unable to read file {name}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("file {name} is not valid UTF-8")]
    NotUtf8 { name: String },

    #[error("unsupported file reference '{0}'")]
    UnsupportedReference(String),
}

#[derive(Debug, Error)]
pub enum EventSinkError {
    #[error("progress event could not be published: {0}")]
    Publish(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate handler for task_type={0}")]
    DuplicateHandler(TaskType),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// ErrorKind は handler 実行エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameter,
    UnsupportedOperation,
    MissingValue,
    FileStorage,
    HandlerNotFound,
    Handler,
    Infrastructure,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a single handler invocation.
///
/// `Display` is the original message unchanged; the cause stays reachable
/// through `source()`.
#[derive(Debug)]
pub struct TaskExecutionError {
    kind: ErrorKind,
    message: String,
    source: Option<BoxError>,
}

impl TaskExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an arbitrary error, keeping its message and the error itself as the cause.
    pub fn wrap<E>(kind: ErrorKind, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    pub fn unsupported_operation(operation: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedOperation,
            format!("unsupported operation '{operation}'"),
        )
    }

    pub fn handler_not_found(task_type: &TaskType) -> Self {
        Self::new(
            ErrorKind::HandlerNotFound,
            format!("handler not found for task_type={task_type}"),
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for TaskExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TaskExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<ParameterError> for TaskExecutionError {
    fn from(error: ParameterError) -> Self {
        Self::wrap(ErrorKind::InvalidParameter, error)
    }
}

impl From<DataError> for TaskExecutionError {
    fn from(error: DataError) -> Self {
        let kind = match &error {
            DataError::MissingValue { .. } => ErrorKind::MissingValue,
            DataError::Storage(_) => ErrorKind::Infrastructure,
            DataError::UnboundScope(_) | DataError::Conversion { .. } => ErrorKind::Handler,
        };
        Self::wrap(kind, error)
    }
}

impl From<FileStorageError> for TaskExecutionError {
    fn from(error: FileStorageError) -> Self {
        Self::wrap(ErrorKind::FileStorage, error)
    }
}

impl From<serde_json::Error> for TaskExecutionError {
    fn from(error: serde_json::Error) -> Self {
        Self::wrap(ErrorKind::Handler, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn wrapped_error_keeps_message_and_cause() {
        let io = std::io::Error::other("disk on fire");
        let err = TaskExecutionError::wrap(ErrorKind::Handler, io);

        assert_eq!(err.to_string(), "disk on fire");
        assert_eq!(err.message(), "disk on fire");
        assert!(err.source().is_some());
    }

    #[test]
    fn parameter_error_names_the_key() {
        let err: TaskExecutionError = ParameterError::Missing {
            key: "input".to_string(),
        }
        .into();

        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(err.to_string().contains("'input'"));
    }

    #[test]
    fn file_store_error_names_the_file() {
        let err = FileStorageError::Store {
            name: "report.csv".to_string(),
            source: std::io::Error::other("broken pipe"),
        };

        assert_eq!(err.to_string(), "unable to store file report.csv");
        assert_eq!(err.source().unwrap().to_string(), "broken pipe");
    }
}
