use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::errors::ParameterError;
use super::TaskId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits `"<component>/v<version>/<action>"`.
    ///
    /// Anything else is treated as a single-action component at version 1.
    pub fn component_ref(&self) -> ComponentRef {
        let mut parts = self.0.splitn(3, '/');
        if let (Some(component), Some(version), Some(action)) =
            (parts.next(), parts.next(), parts.next())
            && let Some(version) = version.strip_prefix('v').and_then(|v| v.parse().ok())
            && !component.is_empty()
            && !action.is_empty()
        {
            return ComponentRef {
                name: component.to_string(),
                version,
                action: action.to_string(),
            };
        }
        ComponentRef {
            name: self.0.clone(),
            version: 1,
            action: self.0.clone(),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Component coordinates a task type maps onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRef {
    pub name: String,
    pub version: u32,
    pub action: String,
}

/// A single workflow step description. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type")]
    task_type: TaskType,
    id: TaskId,
    #[serde(default)]
    parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_id: Option<TaskId>,
}

impl Task {
    pub fn new(task_type: TaskType, id: TaskId, parameters: Map<String, Value>) -> Self {
        Self {
            task_type,
            id,
            parameters,
            parent_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: TaskId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn parent_id(&self) -> Option<TaskId> {
        self.parent_id
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    /// Raw parameter value; `null` counts as missing.
    pub fn required_value(&self, key: &str) -> Result<&Value, ParameterError> {
        match self.parameters.get(key) {
            Some(Value::Null) | None => Err(ParameterError::Missing {
                key: key.to_string(),
            }),
            Some(value) => Ok(value),
        }
    }

    pub fn required<T: DeserializeOwned>(&self, key: &str) -> Result<T, ParameterError> {
        let value = self.required_value(key)?;
        convert(key, value)
    }

    pub fn optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ParameterError> {
        match self.parameters.get(key) {
            Some(Value::Null) | None => Ok(None),
            Some(value) => convert(key, value).map(Some),
        }
    }
}

fn convert<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T, ParameterError> {
    T::deserialize(value).map_err(|e| ParameterError::Invalid {
        key: key.to_string(),
        message: e.to_string(),
    })
}
