//! DataStorage port - 永続 key/value ストア
//!
//! 契約は key 単位の last-write-wins。複数 key にまたがる原子性はありません。

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::DataError;
use crate::domain::execution::ExecutionType;
use crate::domain::scope::Scope;

/// Composite storage key.
///
/// Two keys are equal only if every coordinate matches, so a value written at
/// one scope id is invisible from any other scope or scope id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataKey {
    pub execution_type: ExecutionType,
    pub component_name: String,
    pub action_name: String,
    pub scope: Scope,
    /// `None` only for `Scope::Account`.
    pub scope_id: Option<String>,
    pub key: String,
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}",
            self.execution_type.as_str(),
            self.component_name,
            self.action_name,
            self.scope,
            self.scope_id.as_deref().unwrap_or("*"),
            self.key
        )
    }
}

#[async_trait]
pub trait DataStorage: Send + Sync {
    async fn fetch(&self, key: &DataKey) -> Result<Option<Value>, DataError>;

    async fn put(&self, key: &DataKey, value: Value) -> Result<(), DataError>;

    async fn get(&self, key: &DataKey) -> Result<Value, DataError> {
        self.fetch(key).await?.ok_or_else(|| DataError::MissingValue {
            scope: key.scope,
            key: key.key.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_renders_every_coordinate() {
        let key = DataKey {
            execution_type: ExecutionType::Automation,
            component_name: "github".to_string(),
            action_name: "newIssue".to_string(),
            scope: Scope::Instance,
            scope_id: Some("01J0000000000000000000000".to_string()),
            key: "cursor".to_string(),
        };

        assert_eq!(
            key.to_string(),
            "AUTOMATION:github:newIssue:INSTANCE:01J0000000000000000000000:cursor"
        );
    }

    #[test]
    fn account_key_has_wildcard_scope_id() {
        let key = DataKey {
            execution_type: ExecutionType::Platform,
            component_name: "oauth".to_string(),
            action_name: "token".to_string(),
            scope: Scope::Account,
            scope_id: None,
            key: "accessToken".to_string(),
        };

        assert_eq!(key.to_string(), "PLATFORM:oauth:token:ACCOUNT:*:accessToken");
    }
}
