//! Data capability - スコープ付き key/value
//!
//! 保存キーは (execution_type, component, action, scope, scope_id, key) の合成です。
//! execution_type が未設定の action では `Disabled` になり、書き込みは捨てられ
//! 読み出しは常に「値なし」を返します。

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::domain::errors::DataError;
use crate::domain::execution::ExecutionType;
use crate::domain::scope::{Scope, ScopeBinding};
use crate::ports::{DataKey, DataStorage};

use super::ContextParams;

pub enum Data {
    Active(ScopedData),
    Disabled,
}

/// Data bound to one component action and one set of runtime ids.
pub struct ScopedData {
    storage: Arc<dyn DataStorage>,
    execution_type: ExecutionType,
    component_name: String,
    action_name: String,
    binding: ScopeBinding,
}

impl ScopedData {
    pub fn new(
        storage: Arc<dyn DataStorage>,
        execution_type: ExecutionType,
        component_name: impl Into<String>,
        action_name: impl Into<String>,
        binding: ScopeBinding,
    ) -> Self {
        Self {
            storage,
            execution_type,
            component_name: component_name.into(),
            action_name: action_name.into(),
            binding,
        }
    }

    fn key(&self, scope: Scope, key: &str) -> Result<DataKey, DataError> {
        Ok(DataKey {
            execution_type: self.execution_type,
            component_name: self.component_name.clone(),
            action_name: self.action_name.clone(),
            scope,
            scope_id: self.binding.scope_id(scope)?,
            key: key.to_string(),
        })
    }
}

impl Data {
    pub fn new(storage: Arc<dyn DataStorage>, params: &ContextParams) -> Self {
        match params.execution_type {
            Some(execution_type) => Data::Active(ScopedData::new(
                storage,
                execution_type,
                params.component_name.clone(),
                params.action_name.clone(),
                params.scope_binding(),
            )),
            None => Data::Disabled,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Data::Active(_))
    }

    pub async fn fetch_value(&self, scope: Scope, key: &str) -> Result<Option<Value>, DataError> {
        match self {
            Data::Active(data) => data.storage.fetch(&data.key(scope, key)?).await,
            Data::Disabled => Ok(None),
        }
    }

    pub async fn fetch_typed<T: DeserializeOwned>(
        &self,
        scope: Scope,
        key: &str,
    ) -> Result<Option<T>, DataError> {
        self.fetch_value(scope, key)
            .await?
            .map(|value| {
                serde_json::from_value(value).map_err(|source| DataError::Conversion {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    pub async fn get_value(&self, scope: Scope, key: &str) -> Result<Value, DataError> {
        self.fetch_value(scope, key)
            .await?
            .ok_or_else(|| DataError::MissingValue {
                scope,
                key: key.to_string(),
            })
    }

    pub async fn set_value<V: Serialize>(
        &self,
        scope: Scope,
        key: &str,
        value: V,
    ) -> Result<(), DataError> {
        let Data::Active(data) = self else {
            tracing::trace!(%scope, key, "data disabled, value discarded");
            return Ok(());
        };
        let value = serde_json::to_value(value).map_err(|source| DataError::Conversion {
            key: key.to_string(),
            source,
        })?;
        data.storage.put(&data.key(scope, key)?, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InstanceId, JobId, WorkflowId};
    use crate::impls::InMemoryDataStorage;
    use rstest::rstest;
    use serde_json::json;
    use ulid::Ulid;

    struct Ids {
        job_id: JobId,
        instance_id: InstanceId,
        workflow_id: WorkflowId,
    }

    impl Ids {
        fn new() -> Self {
            Self {
                job_id: JobId::from_ulid(Ulid::new()),
                instance_id: InstanceId::from_ulid(Ulid::new()),
                workflow_id: WorkflowId::from_ulid(Ulid::new()),
            }
        }
    }

    fn params(ids: &Ids, execution_type: Option<ExecutionType>) -> ContextParams {
        ContextParams {
            component_name: "github".to_string(),
            component_version: 1,
            action_name: "newIssue".to_string(),
            instance_id: Some(ids.instance_id),
            execution_type,
            workflow_id: Some(ids.workflow_id),
            job_id: Some(ids.job_id),
            task_id: None,
        }
    }

    fn active(storage: &Arc<InMemoryDataStorage>, ids: &Ids) -> Data {
        Data::new(storage.clone(), &params(ids, Some(ExecutionType::Automation)))
    }

    #[tokio::test]
    async fn value_is_visible_under_the_same_instance_only() {
        let storage = Arc::new(InMemoryDataStorage::new());
        let i1 = Ids::new();
        let i2 = Ids {
            instance_id: InstanceId::from_ulid(Ulid::new()),
            ..Ids::new()
        };

        active(&storage, &i1)
            .set_value(Scope::Instance, "cursor", "42")
            .await
            .unwrap();

        assert_eq!(
            active(&storage, &i1)
                .get_value(Scope::Instance, "cursor")
                .await
                .unwrap(),
            json!("42")
        );
        let err = active(&storage, &i2)
            .get_value(Scope::Instance, "cursor")
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::MissingValue { scope: Scope::Instance, ref key } if key == "cursor"));
    }

    #[rstest]
    #[case::workflow(Scope::Workflow)]
    #[case::account(Scope::Account)]
    #[case::current_execution(Scope::CurrentExecution)]
    #[tokio::test]
    async fn instance_value_is_invisible_at_other_scopes(#[case] other: Scope) {
        let storage = Arc::new(InMemoryDataStorage::new());
        let ids = Ids::new();
        let data = active(&storage, &ids);

        data.set_value(Scope::Instance, "cursor", 42).await.unwrap();

        assert_eq!(data.fetch_value(other, "cursor").await.unwrap(), None);
    }

    #[tokio::test]
    async fn account_scope_is_shared_across_instances_and_jobs() {
        let storage = Arc::new(InMemoryDataStorage::new());

        active(&storage, &Ids::new())
            .set_value(Scope::Account, "token", "abc")
            .await
            .unwrap();

        let token: Option<String> = active(&storage, &Ids::new())
            .fetch_typed(Scope::Account, "token")
            .await
            .unwrap();
        assert_eq!(token.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn disabled_data_never_persists() {
        let storage = Arc::new(InMemoryDataStorage::new());
        let data = Data::new(storage.clone(), &params(&Ids::new(), None));

        data.set_value(Scope::Instance, "cursor", "42").await.unwrap();

        assert!(!data.is_active());
        assert!(storage.is_empty().await);
        assert_eq!(data.fetch_value(Scope::Instance, "cursor").await.unwrap(), None);
        assert!(matches!(
            data.get_value(Scope::Instance, "cursor").await,
            Err(DataError::MissingValue { .. })
        ));
    }

    #[tokio::test]
    async fn unbound_scope_id_is_an_error() {
        let storage = Arc::new(InMemoryDataStorage::new());
        let mut params = params(&Ids::new(), Some(ExecutionType::Embedded));
        params.instance_id = None;
        let data = Data::new(storage.clone(), &params);

        let err = data.set_value(Scope::Instance, "k", 1).await.unwrap_err();
        assert!(matches!(err, DataError::UnboundScope(Scope::Instance)));
        assert!(storage.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_to_one_key_leave_a_single_written_value() {
        let storage = Arc::new(InMemoryDataStorage::new());
        let data = Arc::new(active(&storage, &Ids::new()));

        let writes: Vec<_> = (0..32u32)
            .map(|i| {
                let data = Arc::clone(&data);
                tokio::spawn(async move { data.set_value(Scope::Instance, "cursor", i).await })
            })
            .collect();
        for write in writes {
            write.await.unwrap().unwrap();
        }

        assert_eq!(storage.len().await, 1);
        let cursor: u32 = data
            .fetch_typed(Scope::Instance, "cursor")
            .await
            .unwrap()
            .expect("one write wins");
        assert!(cursor < 32);
    }

    #[tokio::test]
    async fn typed_fetch_with_wrong_shape_is_a_conversion_error() {
        let storage = Arc::new(InMemoryDataStorage::new());
        let data = active(&storage, &Ids::new());
        data.set_value(Scope::Workflow, "count", "many").await.unwrap();

        let err = data
            .fetch_typed::<u32>(Scope::Workflow, "count")
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Conversion { ref key, .. } if key == "count"));
    }
}
