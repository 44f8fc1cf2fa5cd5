//! InMemoryDataStorage - 開発用の key/value ストア

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::errors::DataError;
use crate::ports::{DataKey, DataStorage};

/// Last write wins per key.
#[derive(Default)]
pub struct InMemoryDataStorage {
    values: RwLock<HashMap<DataKey, Value>>,
}

impl InMemoryDataStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

#[async_trait]
impl DataStorage for InMemoryDataStorage {
    async fn fetch(&self, key: &DataKey) -> Result<Option<Value>, DataError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn put(&self, key: &DataKey, value: Value) -> Result<(), DataError> {
        tracing::trace!(key = %key, "data value stored");
        self.values.write().await.insert(key.clone(), value);
        Ok(())
    }
}
