//! Events flowing back to the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, TaskId};

/// Fractional completion of one in-flight invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub task_id: TaskId,
    /// 0..=100
    pub progress: u8,
    pub emitted_at: DateTime<Utc>,
}
