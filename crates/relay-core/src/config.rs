//! EngineConfig - エンジンの設定
//!
//! すべてのフィールドに既定値があるので、空の `{}` も有効な設定です。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::errors::ConfigError;
use crate::domain::execution::ExecutionType;

/// Lower bound for the broker receive timeout.
pub const MIN_POLL_INTERVAL_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub worker_count: usize,
    /// Broker receive timeout for worker and coordinator loops.
    /// Values below `MIN_POLL_INTERVAL_MS` are raised to it.
    pub poll_interval_ms: u64,
    /// Logical directory handed to the File capability.
    pub file_directory: String,
    /// When set, files live on disk under this root instead of in memory.
    pub storage_root: Option<PathBuf>,
    /// Persistence category for jobs that do not name one.
    pub execution_type: Option<ExecutionType>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            poll_interval_ms: 200,
            file_directory: "files".to_string(),
            storage_root: None,
            execution_type: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }
}
